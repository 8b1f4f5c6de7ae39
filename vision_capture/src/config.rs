use crate::pipeline::DEFAULT_PROMPT;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_MODEL: &str = "moondream";
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default, deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default, deserialize_with = "deserialize_log_format")]
    pub log_format: LogFormat,
    #[serde(default)]
    pub inference_server: InferenceServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn deserialize_log_format<'de, D>(deserializer: D) -> Result<LogFormat, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceServerConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    /// Upper bound on a single HTTP exchange. Unset means inference calls may
    /// block for as long as the server takes.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

impl Default for InferenceServerConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            request_timeout_secs: None,
        }
    }
}

impl InferenceServerConfig {
    /// Base URL of the server, without a trailing slash.
    ///
    /// A bare `host` or `host:port` is accepted the same way `OLLAMA_HOST` is
    /// usually written: the scheme defaults to `http` and the port to 11434.
    pub fn get_address(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return default_ollama_host();
        }
        if host.contains("://") {
            return host.to_string();
        }

        let has_port = host
            .rsplit_once(':')
            .is_some_and(|(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()));
        if has_port {
            format!("http://{}", host)
        } else {
            format!("http://{}:{}", host, DEFAULT_OLLAMA_PORT)
        }
    }

    pub fn get_request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CaptureConfig {
    #[serde(default = "default_photos_dir")]
    pub photos_dir: PathBuf,
    #[serde(default = "default_max_camera_index")]
    pub max_camera_index: i32,
    #[serde(default = "default_window_name")]
    pub window_name: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

fn default_photos_dir() -> PathBuf {
    PathBuf::from("photos")
}

fn default_max_camera_index() -> i32 {
    4
}

fn default_window_name() -> String {
    "Vision AI Feed".to_string()
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            photos_dir: default_photos_dir(),
            max_camera_index: default_max_camera_index(),
            window_name: default_window_name(),
            prompt: default_prompt(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl TryFrom<String> for LogFormat {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "{} is not a supported log format. Use either `text` or `json`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(
        &base_path.join("configuration"),
        &environment,
        std::env::var("OLLAMA_HOST").ok(),
    )
}

/// Layers `base.yaml`, the environment file and `VC_*` variables, then lets
/// `ollama_host` win over everything for the server address.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
    ollama_host: Option<String>,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("VC")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("inference_server.host", ollama_host)?
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn server(host: &str) -> InferenceServerConfig {
        InferenceServerConfig {
            host: host.to_string(),
            request_timeout_secs: None,
        }
    }

    #[test]
    fn test_get_address_normalises_host() {
        assert_eq!(server("http://127.0.0.1:11434").get_address(), "http://127.0.0.1:11434");
        assert_eq!(server("http://ollama:11434/").get_address(), "http://ollama:11434");
        assert_eq!(server("127.0.0.1:8080").get_address(), "http://127.0.0.1:8080");
        assert_eq!(server("ollama").get_address(), "http://ollama:11434");
        assert_eq!(server("https://models.lan").get_address(), "https://models.lan");
        assert_eq!(server("  ").get_address(), DEFAULT_OLLAMA_HOST);
    }

    #[test]
    fn test_log_level_and_format_parsing() {
        assert_eq!(LogLevel::try_from("INFO".to_string()), Ok(LogLevel::Info));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
        assert_eq!(LogFormat::try_from("Json".to_string()), Ok(LogFormat::Json));
        assert!(LogFormat::try_from("xml".to_string()).is_err());
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_load_configuration_layers_files_and_host_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.yaml"),
            "log_level: info\ninference_server:\n  host: http://127.0.0.1:11434\ncapture:\n  photos_dir: photos\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("production.yaml"),
            "log_format: json\ncapture:\n  photos_dir: /app/photos\n",
        )
        .unwrap();

        let config = load_configuration(dir.path(), &Environment::Production, None).unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.capture.photos_dir, PathBuf::from("/app/photos"));
        assert_eq!(config.capture.prompt, DEFAULT_PROMPT);
        assert_eq!(config.model.name, DEFAULT_MODEL);
        assert_eq!(config.inference_server.get_request_timeout(), None);

        let config = load_configuration(
            dir.path(),
            &Environment::Local,
            Some("ollama:9999".to_string()),
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.inference_server.get_address(), "http://ollama:9999");
    }

    #[test]
    fn test_load_configuration_defaults_log_settings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "model:\n  name: llava\n").unwrap();

        let config = load_configuration(dir.path(), &Environment::Local, None).unwrap();
        assert_eq!(config.log_level, LogLevel::default());
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::default());
        assert_eq!(config.model.name, "llava");
    }
}
