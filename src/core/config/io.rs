use crate::core::config::data::{path_display, FileConfig};
use crate::core::environment::Environment;
use directories::ProjectDirs;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use super::vars::VarSource;

/// Errors that can occur when loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config at {}: {source}", path_display(.path))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config at {}: {source}", path_display(.path))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config at {}: {source}", path_display(.path))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No API key configured for the {environment} environment (set AI_API_KEY or api_key in the config file)")]
    MissingApiKey { environment: Environment },

    #[error("Could not determine a configuration directory")]
    NoConfigDir,

    #[error("Failed to initialise HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl FileConfig {
    /// Load a config file. A missing file is an empty config.
    pub fn load_from_path(config_path: &Path) -> Result<FileConfig, ConfigError> {
        if !config_path.exists() {
            return Ok(FileConfig::default());
        }
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Write through a temp file in the target directory so readers never
    /// observe a half-written config.
    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: config_path.to_path_buf(),
            source,
        };
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;

        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(config_path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "quill", "quill").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn file_name_for(environment: Environment) -> String {
    format!("config.{}.toml", environment.as_str())
}

pub fn default_path_for(environment: Environment) -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(file_name_for(environment)))
}

/// Everything read from outside the process, captured once.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    files: HashMap<Environment, FileConfig>,
    vars: VarSource,
}

impl ConfigSources {
    pub fn new(files: HashMap<Environment, FileConfig>, vars: VarSource) -> Self {
        Self { files, vars }
    }

    /// Read `config.<env>.toml` for every environment from `dir`, or use the
    /// single file at `explicit` for all of them. Unreadable files are logged
    /// and treated as empty so a bad file never blocks startup.
    pub fn load(dir: Option<&Path>, explicit: Option<&Path>, vars: VarSource) -> Self {
        let mut files = HashMap::new();
        for environment in Environment::ALL {
            let path = match (explicit, dir) {
                (Some(path), _) => path.to_path_buf(),
                (None, Some(dir)) => dir.join(file_name_for(environment)),
                (None, None) => continue,
            };
            match FileConfig::load_from_path(&path) {
                Ok(config) => {
                    debug!(environment = %environment, path = %path_display(&path), "Loaded config file");
                    files.insert(environment, config);
                }
                Err(err) => warn!("{err}; using built-in defaults"),
            }
        }
        Self { files, vars }
    }

    /// Load from the platform config directory and the process environment.
    pub fn discover(explicit: Option<&Path>) -> Self {
        let dir = config_dir();
        Self::load(dir.as_deref(), explicit, VarSource::from_process())
    }

    pub fn file(&self, environment: Environment) -> Option<&FileConfig> {
        self.files.get(&environment)
    }

    pub fn vars(&self) -> &VarSource {
        &self.vars
    }
}
