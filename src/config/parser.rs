//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files, the `.env` file
//! beside it and `LANDFORM_*` environment variables, with environment values
//! taking precedence over the file.

use crate::error::{ConfigError, LandformError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::LandformConfig;

/// Configuration parser for loading the declarations.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LandformConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(LandformError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            LandformError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_paths(&mut config);
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<LandformConfig> {
        debug!("Parsing YAML configuration");

        let config: LandformConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            LandformError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed {} resource declaration(s) for project: {}",
            config.resources.len(),
            config.project.name
        );
        Ok(config)
    }

    /// Loads configuration with `.env` and environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `LANDFORM_<SECTION>_<KEY>` (e.g., `LANDFORM_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<LandformConfig> {
        self.load_dotenv()?;
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(
        config: &mut LandformConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(name) = lookup("LANDFORM_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(env) = lookup("LANDFORM_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(bucket) = lookup("LANDFORM_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("LANDFORM_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(endpoint) = lookup("LANDFORM_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }

        if let Some(concurrency) = lookup("LANDFORM_CONCURRENCY") {
            debug!("Overriding executor.concurrency from environment");
            config.executor.concurrency = concurrency.parse().map_err(|_| {
                ConfigError::invalid(
                    format!("LANDFORM_CONCURRENCY must be a positive integer, got '{concurrency}'"),
                    "executor.concurrency",
                )
            })?;
        }

        Ok(())
    }

    /// Makes relative state and sandbox paths relative to the base path.
    fn resolve_paths(&self, config: &mut LandformConfig) {
        let Some(base) = &self.base_path else {
            return;
        };
        for path in [&mut config.state.path, &mut config.provider.path]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                LandformError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["landform.yaml", "landform.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(LandformError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r"
project:
  name: net
resources:
  - type: aws_vpc
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
";

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();
        assert_eq!(config.project.name, "net");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.resources.len(), 1);
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("landform.yaml")))
            .unwrap_err();
        assert!(matches!(
            err,
            LandformError::Config(ConfigError::ParseError {
                location: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("LANDFORM_PROJECT_ENVIRONMENT", "prod"),
            ("LANDFORM_STATE_BUCKET", "landform-state"),
            ("LANDFORM_CONCURRENCY", "8"),
        ]);

        ConfigParser::apply_env_overrides(&mut config, |name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.project.environment, "prod");
        assert_eq!(config.state.bucket.as_deref(), Some("landform-state"));
        assert_eq!(config.executor.concurrency, 8);
    }

    #[test]
    fn test_invalid_concurrency_override() {
        let mut config = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();
        let result = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == "LANDFORM_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_searches_upward() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("landform.yaml"), MINIMAL).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("landform.yaml"));
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("landform.yaml");
        std::fs::write(
            &file,
            format!("{MINIMAL}state:\n  path: .landform/state.json\n"),
        )
        .unwrap();

        let config = ConfigParser::new()
            .with_base_path(dir.path())
            .load_file(&file)
            .unwrap();
        assert_eq!(config.state.path, Some(dir.path().join(".landform/state.json")));
    }
}
