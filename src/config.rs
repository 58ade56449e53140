use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the shim
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// The supervised backend process
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// External listen port (default: 5000, overridden by the PORT env var)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl ServerConfig {
    /// Effective listen port: the PORT environment variable wins over the
    /// configured value.
    pub fn listen_port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
        }
    }
}

/// Configuration for the supervised backend process
///
/// # Security Warning
///
/// The `command` and `args` fields allow arbitrary command execution.
/// Configuration files must be protected with appropriate file permissions
/// (e.g., readable only by the service user).
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Command to execute to start the backend
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the command
    pub working_dir: Option<String>,

    /// Extra environment variables to set (the current environment is inherited)
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Loopback port the backend listens on, exported to the child as PORT
    /// (default: 3003)
    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Execution mode exported to the child as NODE_ENV (default: "production")
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Health check endpoint path on the backend (default: /health)
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Seconds to wait after spawning before accepting external traffic
    /// (default: 5)
    #[serde(default = "default_warmup")]
    pub warmup_secs: u64,

    /// Max seconds to wait for the backend to answer a proxied request
    /// (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Max seconds to wait for the backend to answer a health probe
    /// (default: 5)
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Grace period in seconds between SIGTERM and SIGKILL on stop
    /// (default: 10)
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl BackendConfig {
    /// Create a backend config for the given command and port, with defaults
    pub fn new(command: &str, port: u16) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            port,
            mode: default_mode(),
            health_path: default_health_path(),
            warmup_secs: default_warmup(),
            request_timeout_secs: default_request_timeout(),
            health_timeout_secs: default_health_timeout(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }

    /// Set arguments for this backend config (builder pattern)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set working directory (builder pattern)
    pub fn with_working_dir(mut self, dir: &str) -> Self {
        self.working_dir = Some(dir.to_string());
        self
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("backend requires a non-empty 'command' field".to_string());
        }

        if self.port == 0 {
            return Err("backend 'port' must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new("", default_backend_port())
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    5000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_backend_port() -> u16 {
    3003
}

fn default_mode() -> String {
    "production".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_warmup() -> u64 {
    5 // seconds between spawning the backend and accepting traffic
}

fn default_request_timeout() -> u64 {
    30 // 30 seconds max for backend to respond
}

fn default_health_timeout() -> u64 {
    5 // short bound for the health probe
}

fn default_shutdown_grace_period() -> u64 {
    10 // 10 seconds between SIGTERM and SIGKILL
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.backend
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
    }
}
