use crate::config::types::{Result, SandboxError, ServiceConfig};
/// Configuration loading from a JSON file plus command-line/environment overrides
use std::path::{Path, PathBuf};

/// Values supplied on the command line or through `SNIPBOX_*` variables.
/// `None` leaves the file/default value in place.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub deadline_ms: Option<u64>,
    pub teardown_grace_ms: Option<u64>,
    pub max_code_bytes: Option<usize>,
    pub max_output_bytes: Option<usize>,
    pub memory_limit_bytes: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub worker_program: Option<PathBuf>,
    pub strict_mode: Option<bool>,
    pub bind: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Defaults, then the optional file, then overrides.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::load_from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.deadline_ms {
            self.deadline_ms = v;
        }
        if let Some(v) = overrides.teardown_grace_ms {
            self.teardown_grace_ms = v;
        }
        if let Some(v) = overrides.max_code_bytes {
            self.max_code_bytes = v;
        }
        if let Some(v) = overrides.max_output_bytes {
            self.max_output_bytes = v;
        }
        if let Some(v) = overrides.memory_limit_bytes {
            self.memory_limit_bytes = v;
        }
        if let Some(v) = overrides.max_concurrent {
            self.max_concurrent = v;
        }
        if let Some(v) = &overrides.worker_program {
            self.worker_program = Some(v.clone());
        }
        if let Some(v) = overrides.strict_mode {
            self.strict_mode = v;
        }
        if let Some(v) = &overrides.bind {
            self.bind = v.clone();
        }
    }
}
