//! Configuration loader

use std::path::Path;

use unimux_utils::{config_file, Result, UnimuxError};

use super::AppConfig;

/// Upper bound for the resolver connect timeout
const MAX_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    ///
    /// A missing default file is not an error.
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(UnimuxError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| UnimuxError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| UnimuxError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if !config.hub.host.is_loopback() {
            return Err(UnimuxError::config(format!(
                "hub.host must be a loopback address, got {}",
                config.hub.host
            )));
        }

        if config.hub.port == 0 {
            return Err(UnimuxError::config("hub.port must be non-zero"));
        }

        let timeout = config.resolver.connect_timeout_ms;
        if timeout == 0 || timeout > MAX_CONNECT_TIMEOUT_MS {
            return Err(UnimuxError::config(format!(
                "resolver.connect_timeout_ms must be between 1 and {}",
                MAX_CONNECT_TIMEOUT_MS
            )));
        }

        if config.resolver.race_backoff_min_ms > config.resolver.race_backoff_max_ms {
            return Err(UnimuxError::config(
                "resolver.race_backoff_min_ms must not exceed race_backoff_max_ms",
            ));
        }

        if config.downstream.command.trim().is_empty() {
            return Err(UnimuxError::config("downstream.command must not be empty"));
        }

        Ok(())
    }

    /// Load from an explicit path or the default location
    pub fn load_optional(path: Option<&Path>) -> Result<AppConfig> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [hub]
            port = 20001

            [downstream]
            command = "my-tool"
            args = ["--stdio"]
            shell = false
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.hub.port, 20001);
        assert_eq!(config.downstream.command, "my-tool");
        assert_eq!(config.downstream.args, vec!["--stdio".to_string()]);
        assert!(!config.downstream.shell);
        // Untouched sections keep defaults
        assert_eq!(config.resolver.connect_timeout_ms, 2000);
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let result = ConfigLoader::load_optional(Some(&path));
        assert!(matches!(result, Err(UnimuxError::ConfigNotFound(_))));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(UnimuxError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_validate_defaults() {
        assert!(ConfigLoader::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_non_loopback() {
        let mut config = AppConfig::default();
        config.hub.host = "0.0.0.0".parse().unwrap();
        assert!(ConfigLoader::validate(&config).is_err());

        config.hub.host = "::1".parse().unwrap();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let mut config = AppConfig::default();
        config.resolver.connect_timeout_ms = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        config.resolver.connect_timeout_ms = MAX_CONNECT_TIMEOUT_MS + 1;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_backoff_order() {
        let mut config = AppConfig::default();
        config.resolver.race_backoff_min_ms = 2000;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = AppConfig::default();
        config.downstream.command = "  ".into();
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
