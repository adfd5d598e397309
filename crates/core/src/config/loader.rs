use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("REELFORGE_").split("_"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing).
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[database]
path = "/var/lib/reelforge/jobs.db"

[tuning.retry]
max_attempts = 4
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(
            config.database.path.to_string_lossy(),
            "/var/lib/reelforge/jobs.db"
        );
        assert_eq!(config.tuning.retry.max_attempts, 4);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.database.path.to_string_lossy(), "reelforge.db");
        assert_eq!(config.tuning.limiter.acquire_poll_secs, 5);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[tuning.limiter]
default_ceiling = 1
lease_ttl_secs = 120

[tuning.scheduler.class_weights]
premium = 0
standard = 600
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.tuning.limiter.default_ceiling, 1);
        assert_eq!(config.tuning.limiter.lease_ttl_secs, 120);
        assert_eq!(config.tuning.scheduler.weight_for("premium"), 0);
    }
}
