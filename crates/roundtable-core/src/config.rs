//! Team configuration loaded from TOML.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::budget::CostModel;
use crate::generation::GenerationConfig;
use crate::role::{Role, RoleKind, RoleSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Act context sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Most recent memory messages handed to the generator; 0 means all.
    pub max_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_messages: 32 }
    }
}

/// One hired role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub kind: RoleKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub review_rounds: u32,
    #[serde(default)]
    pub revision_rounds: u32,
    #[serde(default)]
    pub reads_artifacts: Vec<String>,
}

impl RoleConfig {
    pub fn new(name: impl Into<String>, kind: RoleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            review_rounds: 0,
            revision_rounds: 0,
            reads_artifacts: Vec::new(),
        }
    }
}

/// Top-level configuration for a team run.
///
/// ```toml
/// investment = 3.0
/// n_rounds = 8
///
/// [generation]
/// timeout_ms = 30000
///
/// [[roles]]
/// name = "planner"
/// kind = "planner"
/// review_rounds = 1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Budget cap.
    pub investment: f64,
    pub n_rounds: u32,
    pub generation: GenerationConfig,
    pub cost: CostModel,
    pub context: ContextConfig,
    pub roles: Vec<RoleConfig>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            investment: 10.0,
            n_rounds: 5,
            generation: GenerationConfig::default(),
            cost: CostModel::default(),
            context: ContextConfig::default(),
            roles: vec![
                RoleConfig::new("stakeholder", RoleKind::Stakeholder),
                RoleConfig::new("planner", RoleKind::Planner),
                RoleConfig::new("engineer-1", RoleKind::Engineer),
                RoleConfig::new("engineer-2", RoleKind::Engineer),
            ],
        }
    }
}

impl TeamConfig {
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.investment.is_finite() || self.investment < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "investment must be a non-negative number, got {}",
                self.investment
            )));
        }
        if self.generation.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "generation.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.roles.is_empty() {
            return Err(ConfigError::Invalid("at least one role is required".to_string()));
        }
        let mut seen = HashSet::new();
        for role in &self.roles {
            if role.name.trim().is_empty() {
                return Err(ConfigError::Invalid("role name must not be empty".to_string()));
            }
            if !seen.insert(role.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate role '{}'", role.name)));
            }
        }
        Ok(())
    }

    /// Instantiate the configured roles in hire order.
    ///
    /// Planners receive the names of every configured engineer as their
    /// assignment roster.
    pub fn build_roles(&self) -> Vec<Role> {
        let engineers: Vec<String> = self
            .roles
            .iter()
            .filter(|r| r.kind == RoleKind::Engineer)
            .map(|r| r.name.clone())
            .collect();

        self.roles
            .iter()
            .map(|rc| {
                let settings = RoleSettings {
                    review_rounds: rc.review_rounds,
                    revision_rounds: rc.revision_rounds,
                    reads_artifacts: rc.reads_artifacts.clone(),
                    engineers: if rc.kind == RoleKind::Planner {
                        engineers.clone()
                    } else {
                        Vec::new()
                    },
                };
                Role::new(rc.name.clone(), rc.kind)
                    .with_description(rc.description.clone())
                    .with_settings(settings)
            })
            .collect()
    }
}
