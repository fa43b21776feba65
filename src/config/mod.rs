//! Configuration module
//!
//! Handles connection settings and their storage location

mod settings;

pub use settings::{SessionConfig, CONFIG_FILE};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "gcslink", "gcslink").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory, used for communication logs
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "gcslink", "gcslink").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default location of a communication log named `name`
pub fn log_path(name: &str) -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs").join(name))
}

/// Create the configuration and log directories
pub fn init_directories() -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    if let Some(dir) = data_dir() {
        std::fs::create_dir_all(dir.join("logs"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path() {
        if let Some(path) = log_path("gcs.log") {
            assert!(path.ends_with("logs/gcs.log"));
            assert!(path.starts_with(data_dir().unwrap()));
        }
    }
}
