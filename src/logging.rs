//! Diagnostic log output
//!
//! The crate reports through `tracing`. Applications that have no
//! subscriber of their own can install the default one here; `RUST_LOG`
//! overrides the level, e.g. `RUST_LOG=gcslink=trace` shows every reply.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber that logs at `default_level` and above.
/// Fails if a global subscriber is already set.
pub fn init(default_level: Level) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        init(Level::WARN).ok();
        assert!(init(Level::WARN).is_err());
    }
}
