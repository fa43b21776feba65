//! Message layer settings of one controller connection

use crate::core::command::{Dialect, DEFAULT_FLOAT_DIGITS};
use crate::core::transport::{Transport, DEFAULT_TIMEOUT_MS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the settings file in the config directory
pub const CONFIG_FILE: &str = "session.toml";

/// Settings of one controller connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reply timeout in milliseconds
    pub timeout_ms: u64,
    /// Query `ERR?` after each command
    pub errcheck: bool,
    /// Send `ERR?` in the same write as the command
    pub embederr: bool,
    /// Communication log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logfile: Option<PathBuf>,
    /// Timestamp communication log lines
    pub log_timestamps: bool,
    /// Significant digits for float arguments
    pub float_digits: usize,
    /// Protocol dialect of the controller
    pub dialect: Dialect,
    /// How to reach the controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            errcheck: true,
            embederr: false,
            logfile: None,
            log_timestamps: false,
            float_digits: DEFAULT_FLOAT_DIGITS,
            dialect: Dialect::default(),
            transport: None,
        }
    }
}

impl SessionConfig {
    /// Settings for `transport` with default values otherwise
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            ..Self::default()
        }
    }

    /// Reply timeout in milliseconds
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Error check after each command
    #[must_use]
    pub fn errcheck(mut self, errcheck: bool) -> Self {
        self.errcheck = errcheck;
        self
    }

    /// Embedded error query
    #[must_use]
    pub fn embederr(mut self, embederr: bool) -> Self {
        self.embederr = embederr;
        self
    }

    /// Communication log file
    #[must_use]
    pub fn logfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.logfile = Some(path.into());
        self
    }

    /// Protocol dialect
    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Load from the config directory, defaults if there is no file yet
    pub fn load() -> anyhow::Result<Self> {
        let path = super::config_dir()
            .context("could not determine config directory")?
            .join(CONFIG_FILE);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from `path`
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save to the config directory
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = super::config_dir().context("could not determine config directory")?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join(CONFIG_FILE))
    }

    /// Save to `path`
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!("SessionConfig saved to {}", path.display());
        Ok(())
    }
}
