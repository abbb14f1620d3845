use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ConfigError;

pub const DEFAULT_INFERENCE_EXECUTABLE: &str = "python3";
pub const DEFAULT_PROCESS_TIMEOUT_MS: u64 = 15_000;

/// Settings for launching the external predictor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictorConfig {
    pub inference_executable: String,
    pub predictor_script_path: PathBuf,
    pub model_path: String,
    pub process_timeout_ms: u64,
    pub strict_decoding: bool,
}

/// On-disk shape of the predictor YAML file. Every key is optional so the
/// environment can fill in or override whatever the file leaves out.
#[derive(Debug, Default, Deserialize)]
struct PredictorFile {
    inference_executable: Option<String>,
    predictor_script_path: Option<PathBuf>,
    model_path: Option<String>,
    process_timeout_ms: Option<u64>,
    strict_decoding: Option<bool>,
}

impl PredictorConfig {
    pub fn new(predictor_script_path: impl Into<PathBuf>, model_path: impl Into<String>) -> Self {
        Self {
            inference_executable: DEFAULT_INFERENCE_EXECUTABLE.to_string(),
            predictor_script_path: predictor_script_path.into(),
            model_path: model_path.into(),
            process_timeout_ms: DEFAULT_PROCESS_TIMEOUT_MS,
            strict_decoding: false,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.inference_executable = executable.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.process_timeout_ms = timeout_ms;
        self
    }

    pub fn with_strict_decoding(mut self, strict: bool) -> Self {
        self.strict_decoding = strict;
        self
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    /// Resolves the predictor settings from an optional YAML file named by
    /// `PREDICTOR_CONFIG`, then applies environment overrides.
    pub fn load<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match lookup("PREDICTOR_CONFIG") {
            Some(path) => Self::read_file(Path::new(&path))?,
            None => PredictorFile::default(),
        };

        let inference_executable = lookup("INFERENCE_EXECUTABLE")
            .or(file.inference_executable)
            .unwrap_or_else(|| DEFAULT_INFERENCE_EXECUTABLE.to_string());
        let predictor_script_path = lookup("PREDICTOR_SCRIPT_PATH")
            .map(PathBuf::from)
            .or(file.predictor_script_path)
            .ok_or(ConfigError::Missing("PREDICTOR_SCRIPT_PATH"))?;
        let model_path = lookup("MODEL_PATH")
            .or(file.model_path)
            .ok_or(ConfigError::Missing("MODEL_PATH"))?;

        let process_timeout_ms = match lookup("PROCESS_TIMEOUT_MS") {
            Some(raw) => parse_timeout(&raw)?,
            None => file.process_timeout_ms.unwrap_or(DEFAULT_PROCESS_TIMEOUT_MS),
        };
        if process_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "PROCESS_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        let strict_decoding = match lookup("STRICT_DECODING") {
            Some(raw) => parse_bool("STRICT_DECODING", &raw)?,
            None => file.strict_decoding.unwrap_or(false),
        };

        Ok(Self {
            inference_executable,
            predictor_script_path,
            model_path,
            process_timeout_ms,
            strict_decoding,
        })
    }

    fn read_file(path: &Path) -> Result<PredictorFile, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: PredictorFile = serde_yaml::from_str(&config_str)?;
        Ok(file)
    }
}

fn parse_timeout(raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
        key: "PROCESS_TIMEOUT_MS",
        value: raw.to_string(),
    })
}

pub(crate) fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}
