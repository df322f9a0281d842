//! Configuration management.
//!
//! Configuration is resolved once at process start into an immutable
//! [`Config`] that is handed explicitly to the transports.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use terraform_mcp_types::{DEFAULT_ENDPOINT, DEFAULT_HOST, DEFAULT_PORT};

use crate::cors::{CorsMode, OriginPolicy};
use crate::error::ConfigError;

/// Default keep-alive ping interval in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 25;

/// Default graceful drain bound in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Default idle time before a stateful session without open streams is removed.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

/// Environment variable naming an explicit config file.
const CONFIG_PATH_VAR: &str = "TERRAFORM_MCP_CONFIG";

/// Environment variables read by the loaders.
const ENV_KEYS: [&str; 12] = [
    "TRANSPORT_MODE",
    "TRANSPORT_HOST",
    "TRANSPORT_PORT",
    "MCP_ENDPOINT",
    "MCP_SESSION_MODE",
    "MCP_ALLOWED_ORIGINS",
    "MCP_CORS_MODE",
    "MCP_KEEP_ALIVE_INTERVAL",
    "MCP_SHUTDOWN_TIMEOUT",
    "MCP_SESSION_IDLE_TIMEOUT",
    "MCP_LOG_LEVEL",
    "MCP_LOG_FILE",
];

/// Raw settings as they appear in config files and the environment.
///
/// Keys are the lowercase environment variable names. Every value is kept
/// as text so that empty strings survive until resolution, whatever type
/// the provider parsed it as.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, deserialize_with = "lenient::string")]
    pub transport_mode: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub transport_host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub transport_port: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_endpoint: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_session_mode: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_allowed_origins: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_cors_mode: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_keep_alive_interval: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_shutdown_timeout: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_session_idle_timeout: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_log_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mcp_log_file: Option<String>,
}

/// Which transport the process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
}

/// Whether the MCP endpoint keeps session state server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Stateful,
    Stateless,
}

impl FromStr for SessionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "stateful" => Ok(SessionMode::Stateful),
            "stateless" => Ok(SessionMode::Stateless),
            _ => Err(ConfigError::InvalidSessionMode(s.to_string())),
        }
    }
}

/// Settings for the streamable-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// MCP endpoint path, without trailing slash
    pub endpoint: String,
    /// Server-side session persistence
    pub session_mode: SessionMode,
    /// Origin policy for the MCP endpoint
    pub origin_policy: OriginPolicy,
    /// Keep-alive ping interval; `None` disables pings
    pub keep_alive_interval: Option<Duration>,
    /// Bound on the graceful drain at shutdown
    pub shutdown_timeout: Duration,
    /// Idle time before a stateful session with no open stream is removed;
    /// `None` keeps sessions until DELETE
    pub session_idle_timeout: Option<Duration>,
}

impl HttpConfig {
    /// The `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_mode: SessionMode::default(),
            origin_policy: OriginPolicy::default(),
            keep_alive_interval: Some(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS)),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            session_idle_timeout: Some(Duration::from_secs(DEFAULT_SESSION_IDLE_SECS)),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Selected transport
    pub transport: TransportKind,
    /// HTTP transport settings (resolved even when serving stdio)
    pub http: HttpConfig,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
    /// Path to log file (if set, logs will be written to file in addition to stderr)
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration with full priority chain: env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `config.toml` in the user config directory (~/.config/terraform-mcp-server/ on Linux)
    /// 2. `.terraform-mcp.toml` in the current directory
    /// 3. the file named by `TERRAFORM_MCP_CONFIG`
    pub fn load() -> Result<Self, ConfigError> {
        let user_config = directories::ProjectDirs::from("", "", "terraform-mcp-server")
            .map(|dirs| dirs.config_dir().join("config.toml"));
        let local_config = env::current_dir()
            .ok()
            .map(|dir| dir.join(".terraform-mcp.toml"));
        let explicit_config = env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);

        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));

        for path in [user_config, local_config, explicit_config].into_iter().flatten() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::raw().only(&ENV_KEYS));

        let settings: Settings = figment.extract()?;
        Self::from_settings(settings)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |key: &str| env::var(key).ok();

        Self::from_settings(Settings {
            transport_mode: var("TRANSPORT_MODE"),
            transport_host: var("TRANSPORT_HOST"),
            transport_port: var("TRANSPORT_PORT"),
            mcp_endpoint: var("MCP_ENDPOINT"),
            mcp_session_mode: var("MCP_SESSION_MODE"),
            mcp_allowed_origins: var("MCP_ALLOWED_ORIGINS"),
            mcp_cors_mode: var("MCP_CORS_MODE"),
            mcp_keep_alive_interval: var("MCP_KEEP_ALIVE_INTERVAL"),
            mcp_shutdown_timeout: var("MCP_SHUTDOWN_TIMEOUT"),
            mcp_session_idle_timeout: var("MCP_SESSION_IDLE_TIMEOUT"),
            mcp_log_level: var("MCP_LOG_LEVEL"),
            mcp_log_file: var("MCP_LOG_FILE"),
        })
    }

    /// Resolve raw settings into a validated configuration.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let host = non_empty(settings.transport_host);
        let port = non_empty(settings.transport_port);

        let transport = match non_empty(settings.transport_mode) {
            None if host.is_some() || port.is_some() => TransportKind::StreamableHttp,
            None => TransportKind::Stdio,
            Some(mode) => match mode.to_ascii_lowercase().as_str() {
                "stdio" => TransportKind::Stdio,
                "http" | "streamable-http" => TransportKind::StreamableHttp,
                _ => return Err(ConfigError::InvalidTransportMode(mode)),
            },
        };

        let port = match port {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            None => DEFAULT_PORT,
        };

        let endpoint = match non_empty(settings.mcp_endpoint) {
            Some(path) if path.starts_with('/') => {
                let trimmed = path.trim_end_matches('/');
                if trimmed.is_empty() {
                    return Err(ConfigError::InvalidEndpoint(path));
                }
                trimmed.to_string()
            }
            Some(path) => return Err(ConfigError::InvalidEndpoint(path)),
            None => DEFAULT_ENDPOINT.to_string(),
        };

        let session_mode = settings
            .mcp_session_mode
            .as_deref()
            .unwrap_or_default()
            .parse::<SessionMode>()?;
        let cors_mode = settings
            .mcp_cors_mode
            .as_deref()
            .unwrap_or_default()
            .parse::<CorsMode>()?;
        let origin_policy = OriginPolicy::from_list(
            cors_mode,
            settings.mcp_allowed_origins.as_deref().unwrap_or_default(),
        );

        let keep_alive_secs = parse_secs(
            "MCP_KEEP_ALIVE_INTERVAL",
            settings.mcp_keep_alive_interval,
            DEFAULT_KEEP_ALIVE_SECS,
        )?;
        let shutdown_secs = parse_secs(
            "MCP_SHUTDOWN_TIMEOUT",
            settings.mcp_shutdown_timeout,
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        )?;
        let idle_secs = parse_secs(
            "MCP_SESSION_IDLE_TIMEOUT",
            settings.mcp_session_idle_timeout,
            DEFAULT_SESSION_IDLE_SECS,
        )?;

        Ok(Self {
            transport,
            http: HttpConfig {
                host: host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port,
                endpoint,
                session_mode,
                origin_policy,
                keep_alive_interval: (keep_alive_secs > 0)
                    .then(|| Duration::from_secs(keep_alive_secs)),
                shutdown_timeout: Duration::from_secs(shutdown_secs),
                session_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            },
            log_level: non_empty(settings.mcp_log_level),
            log_file: non_empty(settings.mcp_log_file).map(PathBuf::from),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdio,
            http: HttpConfig::default(),
            log_level: None,
            log_file: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_secs(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match non_empty(value) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidInterval { name, value: raw }),
        None => Ok(default),
    }
}

/// Figment parses env values that look like numbers or booleans into those
/// types, and TOML files may carry them unquoted; accept any scalar as text.
mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Bool(bool),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    pub fn string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
            Raw::Text(text) => text,
            Raw::Unsigned(n) => n.to_string(),
            Raw::Signed(n) => n.to_string(),
            Raw::Bool(b) => b.to_string(),
            Raw::Float(n) => n.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn settings() -> Settings {
        Settings::default()
    }

    fn clear_env() {
        for key in ENV_KEYS.iter().chain([CONFIG_PATH_VAR].iter()) {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_stdio() {
        let config = Config::from_settings(settings()).unwrap();

        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.http.port, DEFAULT_PORT);
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.http.endpoint, "/mcp");
        assert_eq!(config.http.session_mode, SessionMode::Stateful);
        assert_eq!(config.http.keep_alive_interval, Some(Duration::from_secs(25)));
        assert_eq!(config.http.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(
            config.http.session_idle_timeout,
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_empty_cors_settings_resolve_to_strict() {
        let config = Config::from_settings(Settings {
            mcp_allowed_origins: Some(String::new()),
            mcp_cors_mode: Some(String::new()),
            ..settings()
        })
        .unwrap();

        assert_eq!(config.http.origin_policy.mode(), CorsMode::Strict);
        assert!(config.http.origin_policy.allowed_origins().is_empty());
    }

    #[test]
    fn test_port_or_host_implies_http() {
        let by_port = Config::from_settings(Settings {
            transport_port: Some("9000".to_string()),
            ..settings()
        })
        .unwrap();
        assert_eq!(by_port.transport, TransportKind::StreamableHttp);
        assert_eq!(by_port.http.port, 9000);

        let by_host = Config::from_settings(Settings {
            transport_host: Some("0.0.0.0".to_string()),
            ..settings()
        })
        .unwrap();
        assert_eq!(by_host.transport, TransportKind::StreamableHttp);
        assert_eq!(by_host.http.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_explicit_stdio_wins_over_port() {
        let config = Config::from_settings(Settings {
            transport_mode: Some("stdio".to_string()),
            transport_port: Some("9000".to_string()),
            ..settings()
        })
        .unwrap();
        assert_eq!(config.transport, TransportKind::Stdio);
    }

    #[test]
    fn test_transport_mode_names() {
        for name in ["http", "streamable-http", "Streamable-HTTP"] {
            let config = Config::from_settings(Settings {
                transport_mode: Some(name.to_string()),
                ..settings()
            })
            .unwrap();
            assert_eq!(config.transport, TransportKind::StreamableHttp, "{name}");
        }

        let err = Config::from_settings(Settings {
            transport_mode: Some("websocket".to_string()),
            ..settings()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTransportMode(_)));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let bad_port = Config::from_settings(Settings {
            transport_port: Some("eighty".to_string()),
            ..settings()
        });
        assert!(matches!(bad_port, Err(ConfigError::InvalidPort(_))));

        let bad_session = Config::from_settings(Settings {
            mcp_session_mode: Some("sticky".to_string()),
            ..settings()
        });
        assert!(matches!(bad_session, Err(ConfigError::InvalidSessionMode(_))));

        let bad_endpoint = Config::from_settings(Settings {
            mcp_endpoint: Some("mcp".to_string()),
            ..settings()
        });
        assert!(matches!(bad_endpoint, Err(ConfigError::InvalidEndpoint(_))));

        let bad_interval = Config::from_settings(Settings {
            mcp_keep_alive_interval: Some("soon".to_string()),
            ..settings()
        });
        assert!(matches!(
            bad_interval,
            Err(ConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_stateless_and_zero_keep_alive() {
        let config = Config::from_settings(Settings {
            mcp_session_mode: Some("STATELESS".to_string()),
            mcp_keep_alive_interval: Some("0".to_string()),
            mcp_endpoint: Some("/api/mcp/".to_string()),
            ..settings()
        })
        .unwrap();

        assert_eq!(config.http.session_mode, SessionMode::Stateless);
        assert_eq!(config.http.keep_alive_interval, None);
        assert_eq!(config.http.endpoint, "/api/mcp");
    }

    #[test]
    fn test_zero_idle_timeout_keeps_sessions() {
        let config = Config::from_settings(Settings {
            mcp_session_idle_timeout: Some("0".to_string()),
            ..settings()
        })
        .unwrap();
        assert_eq!(config.http.session_idle_timeout, None);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let config = Config::from_settings(Settings {
            transport_host: Some("::1".to_string()),
            transport_port: Some("8443".to_string()),
            ..settings()
        })
        .unwrap();
        assert_eq!(config.http.bind_address(), "[::1]:8443");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var("TRANSPORT_MODE", "streamable-http");
        std::env::set_var("MCP_ALLOWED_ORIGINS", "https://example.com, https://other.dev");
        std::env::set_var("MCP_CORS_MODE", "development");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.transport, TransportKind::StreamableHttp);
        assert_eq!(config.http.origin_policy.mode(), CorsMode::Development);
        assert_eq!(
            config.http.origin_policy.allowed_origins(),
            ["https://example.com", "https://other.dev"]
        );
    }

    #[test]
    #[serial]
    fn test_load_config_file() {
        clear_env();

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("server.toml");
        fs::write(
            &config_file,
            r#"
transport_mode = "http"
transport_port = 7777
mcp_cors_mode = "disabled"
mcp_keep_alive_interval = 10
"#,
        )
        .unwrap();
        std::env::set_var(CONFIG_PATH_VAR, &config_file);

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.transport, TransportKind::StreamableHttp);
        assert_eq!(config.http.port, 7777);
        assert_eq!(config.http.origin_policy.mode(), CorsMode::Disabled);
        assert_eq!(config.http.keep_alive_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    #[serial]
    fn test_env_vars_override_config_file() {
        clear_env();

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("server.toml");
        fs::write(&config_file, "transport_mode = \"http\"\ntransport_port = 7777\n").unwrap();
        std::env::set_var(CONFIG_PATH_VAR, &config_file);
        std::env::set_var("TRANSPORT_PORT", "8888");

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.http.port, 8888);
    }

    #[test]
    #[serial]
    fn test_string_keys_accept_bool_and_number_values() {
        clear_env();
        std::env::set_var("TRANSPORT_HOST", "true");
        std::env::set_var("MCP_LOG_LEVEL", "42");

        let config = Config::load();
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.transport, TransportKind::StreamableHttp);
        assert_eq!(config.http.host, "true");
        assert_eq!(config.log_level.as_deref(), Some("42"));
    }

    #[test]
    #[serial]
    fn test_unquoted_toml_scalars_are_text() {
        clear_env();

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("server.toml");
        fs::write(&config_file, "transport_host = false
mcp_log_file = 7
").unwrap();
        std::env::set_var(CONFIG_PATH_VAR, &config_file);

        let config = Config::load();
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.http.host, "false");
        assert_eq!(config.log_file, Some(PathBuf::from("7")));
    }
}
