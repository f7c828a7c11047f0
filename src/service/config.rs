use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Default config file, looked up in the working directory when `--conf` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "conf.toml";
/// Environment overrides, e.g. `DETECT__NETWORK__PORT=6000`.
pub const ENV_PREFIX: &str = "DETECT";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub max_connection: usize,
    /// Largest request payload accepted, in bytes.
    pub max_frame_size: usize,
    pub conn_read_buffer_size: usize,
    /// Deadline for receiving one complete request frame.
    pub read_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_connection: 128,
            max_frame_size: 16 * 1024 * 1024,
            conn_read_buffer_size: 64 * 1024,
            read_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    /// Unset means the detector may take as long as it needs.
    pub detect_timeout_ms: Option<u64>,
    pub model_path: String,
    pub input_size: u32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub palette_seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            confidence_threshold: 0.7,
            detect_timeout_ms: None,
            model_path: "yolov8n.onnx".to_string(),
            input_size: 640,
            iou_threshold: 0.45,
            max_detections: 100,
            palette_seed: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub show_image: bool,
    pub return_coordinates: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            show_image: false,
            return_coordinates: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub detector: DetectorConfig,
    pub debug: DebugConfig,
}

impl ServerConfig {
    /// Loads configuration from `path` (required) or from [`DEFAULT_CONFIG_FILE`]
    /// (optional), then applies `DETECT__` environment overrides.
    pub fn set_up_config<P: AsRef<Path>>(path: Option<P>) -> AppResult<ServerConfig> {
        let file = match path.as_ref() {
            Some(path) => {
                let path: &Path = path.as_ref();
                let path_str = path.to_str().ok_or_else(|| {
                    AppError::InvalidValue(format!("config file path: {}", path.to_string_lossy()))
                })?;
                config::File::with_name(path_str).required(true)
            }
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be at least 1".to_string(),
            ));
        }
        if self.network.max_frame_size == 0 {
            return Err(AppError::InvalidValue(
                "network.max_frame_size must be at least 1".to_string(),
            ));
        }
        if self.network.max_frame_size > u32::MAX as usize {
            return Err(AppError::InvalidValue(format!(
                "network.max_frame_size {} does not fit a 32-bit length prefix",
                self.network.max_frame_size
            )));
        }
        // zero would expire every exchange before its first byte
        if self.network.read_timeout_ms == 0 {
            return Err(AppError::InvalidValue(
                "network.read_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.detector.detect_timeout_ms == Some(0) {
            return Err(AppError::InvalidValue(
                "detector.detect_timeout_ms must be at least 1 when set".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(AppError::InvalidValue(format!(
                "detector.confidence_threshold {} is outside [0, 1]",
                self.detector.confidence_threshold
            )));
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.network.read_timeout_ms)
    }

    pub fn detect_timeout(&self) -> Option<Duration> {
        self.detector.detect_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[network]\nport = 6001\nread_timeout_ms = 250\n\n[debug]\nreturn_coordinates = false"
        )
        .unwrap();

        let config = ServerConfig::set_up_config(Some(file.path())).unwrap();
        assert_eq!(config.network.port, 6001);
        assert_eq!(config.network.host, "0.0.0.0");
        assert_eq!(config.read_timeout(), Duration::from_millis(250));
        assert!(!config.debug.return_coordinates);
        assert_eq!(config.detector, DetectorConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = ServerConfig::set_up_config(Some("/nonexistent/objdetect.toml"));
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = ServerConfig::default();
        config.detector.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
        assert_eq!(ServerConfig::default().listen_address(), "0.0.0.0:5000");
        assert!(ServerConfig::default().detect_timeout().is_none());
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = ServerConfig::default();
        config.network.read_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(AppError::InvalidValue(_))));

        let mut config = ServerConfig::default();
        config.network.max_frame_size = 0;
        assert!(matches!(config.validate(), Err(AppError::InvalidValue(_))));

        let mut config = ServerConfig::default();
        config.detector.detect_timeout_ms = Some(0);
        assert!(matches!(config.validate(), Err(AppError::InvalidValue(_))));

        config.detector.detect_timeout_ms = Some(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_read_timeout_from_file_fails() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[network]\nread_timeout_ms = 0").unwrap();
        let result = ServerConfig::set_up_config(Some(file.path()));
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
    }
}
