//! autopilot.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::types::{Action, Condition, Policy, Priority};

/// Default scale-down band: `threshold * 0.7`.
pub const DEFAULT_HYSTERESIS_FACTOR: f64 = 0.7;
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HISTORY_LIMIT: usize = 120;
pub const DEFAULT_INSTANCES: u32 = 1;
pub const DEFAULT_PORT: u16 = 8650;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
    #[serde(default, rename = "policy")]
    pub policies: Vec<PolicyConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub hysteresis_factor: Option<f64>,
    pub action_timeout: Option<String>,
    pub history_limit: Option<usize>,
    pub default_instances: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    /// Controlled quantity on first start.
    pub instances: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub id: String,
    pub name: Option<String>,
    pub target: Option<String>,
    pub metric: String,
    pub condition: Condition,
    pub threshold: f64,
    pub threshold_max: Option<f64>,
    pub action: Action,
    pub priority: Option<Priority>,
    pub cooldown: Option<String>,
    pub min_bound: Option<u32>,
    pub max_bound: Option<u32>,
    pub step: Option<u32>,
    pub enabled: Option<bool>,
}

/// Engine settings with defaults applied and durations parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub hysteresis_factor: f64,
    pub action_timeout: Duration,
    pub history_limit: usize,
    pub default_instances: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hysteresis_factor: DEFAULT_HYSTERESIS_FACTOR,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_instances: DEFAULT_INSTANCES,
        }
    }
}

impl PolicyConfig {
    /// Resolve defaults and produce a validated [`Policy`].
    pub fn to_policy(&self, now: u64) -> Result<Policy, ConfigError> {
        let cooldown = match &self.cooldown {
            Some(s) => {
                let d = parse_duration(s)?;
                // Cooldowns are kept in whole seconds.
                if d.subsec_nanos() != 0 {
                    return Err(ConfigError::InvalidDuration(s.clone()));
                }
                d
            }
            None => Duration::ZERO,
        };
        let policy = Policy {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            target: self.target.clone(),
            metric: self.metric.clone(),
            condition: self.condition,
            threshold: self.threshold,
            threshold_max: self.threshold_max,
            action: self.action,
            priority: self.priority.unwrap_or(Priority::Medium),
            cooldown_secs: cooldown.as_secs(),
            min_bound: self.min_bound.unwrap_or(1),
            max_bound: self.max_bound.unwrap_or(u32::MAX),
            step: self.step.unwrap_or(1),
            enabled: self.enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        policy.validate()?;
        Ok(policy)
    }
}

impl AutopilotConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AutopilotConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Engine settings with defaults applied.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        let defaults = EngineSettings::default();
        let hysteresis_factor = self
            .engine
            .hysteresis_factor
            .unwrap_or(defaults.hysteresis_factor);
        if !(hysteresis_factor > 0.0 && hysteresis_factor < 1.0) {
            return Err(ConfigError::InvalidHysteresis(hysteresis_factor));
        }
        let action_timeout = match &self.engine.action_timeout {
            Some(s) => parse_duration(s)?,
            None => defaults.action_timeout,
        };
        Ok(EngineSettings {
            hysteresis_factor,
            action_timeout,
            history_limit: self.engine.history_limit.unwrap_or(defaults.history_limit),
            default_instances: self
                .engine
                .default_instances
                .unwrap_or(defaults.default_instances),
        })
    }

    /// All configured policies, validated.
    pub fn policies(&self, now: u64) -> Result<Vec<Policy>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.policies.len());
        for p in &self.policies {
            if !seen.insert(p.id.as_str()) {
                return Err(ConfigError::DuplicatePolicy(p.id.clone()));
            }
            out.push(p.to_policy(now)?);
        }
        Ok(out)
    }

    /// Check the whole file without producing anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_settings()?;
        self.policies(0)?;
        let mut seen = HashSet::new();
        for t in &self.targets {
            if !seen.insert(t.id.as_str()) {
                return Err(ConfigError::DuplicateTarget(t.id.clone()));
            }
        }
        Ok(())
    }

    /// Scaffold a small autopilot.toml with one scale-up policy.
    pub fn scaffold(target: &str) -> Self {
        AutopilotConfig {
            engine: EngineConfig {
                hysteresis_factor: Some(DEFAULT_HYSTERESIS_FACTOR),
                action_timeout: Some("30s".to_string()),
                history_limit: Some(DEFAULT_HISTORY_LIMIT),
                default_instances: Some(DEFAULT_INSTANCES),
            },
            server: ServerConfig {
                port: Some(DEFAULT_PORT),
                data_dir: Some(PathBuf::from("/var/lib/autopilot")),
            },
            targets: vec![TargetConfig {
                id: target.to_string(),
                instances: 2,
            }],
            policies: vec![PolicyConfig {
                id: "cpu-high".to_string(),
                name: Some("CPU above 85%".to_string()),
                target: Some(target.to_string()),
                metric: "cpu".to_string(),
                condition: Condition::Above,
                threshold: 85.0,
                threshold_max: None,
                action: Action::ScaleUp,
                priority: Some(Priority::High),
                cooldown: Some("5m".to_string()),
                min_bound: Some(2),
                max_bound: Some(10),
                step: Some(1),
                enabled: Some(true),
            }],
        }
    }
}
