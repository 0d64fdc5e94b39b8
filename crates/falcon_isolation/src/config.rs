use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IsolationError, IsolationResult};

/// Top-level tester configuration (`fisotest.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsolationConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub session: SessionInitConfig,
}

impl IsolationConfig {
    pub fn from_toml(text: &str) -> IsolationResult<Self> {
        toml::from_str(text).map_err(|e| IsolationError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> IsolationResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> IsolationResult<String> {
        toml::to_string_pretty(self).map_err(|e| IsolationError::Config(e.to_string()))
    }
}

/// Where every session connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
        }
    }
}

/// Polling and timeout policy for steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long one poll for a step result may wait (default: 20ms).
    pub poll_interval_ms: u64,
    /// Send a cancel request to a step still running after this long (default: 60s).
    pub cancel_after_secs: u64,
    /// Abort the run when a step is still running after this long (default: 75s).
    pub fail_after_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            cancel_after_secs: 60,
            fail_after_secs: 75,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_after(&self) -> Duration {
        Duration::from_secs(self.cancel_after_secs)
    }

    pub fn fail_after(&self) -> Duration {
        Duration::from_secs(self.fail_after_secs)
    }

    pub fn validate(&self) -> IsolationResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(IsolationError::Config(
                "timing.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.fail_after_secs <= self.cancel_after_secs {
            return Err(IsolationError::Config(format!(
                "timing.fail_after_secs ({}) must exceed timing.cancel_after_secs ({})",
                self.fail_after_secs, self.cancel_after_secs
            )));
        }
        Ok(())
    }
}

/// Statements every connection runs right after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInitConfig {
    pub init_statements: Vec<String>,
}

impl Default for SessionInitConfig {
    fn default() -> Self {
        Self {
            init_statements: vec![
                "SET client_min_messages = warning;".to_string(),
                "SET datestyle = 'Postgres, MDY';".to_string(),
            ],
        }
    }
}
