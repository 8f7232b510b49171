use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Flat variables accepted for compatibility with existing deployments.
/// Each one overrides the nested key it maps to.
const FLAT_ENV_OVERRIDES: [(&str, &str); 4] = [
    ("PORT", "server.port"),
    ("PROJECT_ID", "backend.project_id"),
    ("LOG_ID", "backend.log_id"),
    ("GOOGLE_APPLICATION_CREDENTIALS", "backend.credentials"),
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DrainConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    /// Largest accepted request body
    pub body_limit_bytes: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub project_id: String,
    /// Log id used for every entry (or as fallback with `scope = "path"`)
    pub log_id: String,
    /// Service account credentials file
    pub credentials: Option<String>,
    pub scope: SinkScope,
    /// Distinct path log ids kept with `scope = "path"`; further ids use `log_id`
    pub max_log_ids: usize,
    /// Entries buffered between the handler and the writer task
    pub queue_capacity: usize,
    pub output: EntryOutput,
}

/// How the sink for a request is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkScope {
    /// One logger for every request
    Static,
    /// First URL path segment selects the log id
    Path,
}

/// Where delivered entries are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryOutput {
    Stdout,
    File { path: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl DrainConfig {
    /// Load configuration from drain.toml and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let mut builder = Self::builder()?;

        // Layer config files (overrides defaults)
        // 1. /etc/syslog-drain/drain.toml (container image)
        // 2. config/drain.toml (local development)
        for path in ["/etc/syslog-drain/drain", "config/drain"] {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys: DRAIN_SERVER__PORT, DRAIN_BACKEND__PROJECT_ID, ...
        builder = builder.add_source(
            config::Environment::with_prefix("DRAIN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in FLAT_ENV_OVERRIDES {
            builder = builder
                .set_override_option(key, std::env::var(var).ok())
                .with_context(|| format!("Failed to apply {var}"))?;
        }

        Self::from_builder(builder)
    }

    /// Compile-time defaults as the base layer.
    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = config::Config::try_from(&DrainConfig::default())
            .context("Failed to serialize default configuration")?;
        Ok(config::Config::builder().add_source(defaults))
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind_host, self.server.port)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.bind_address()
            .parse::<std::net::SocketAddr>()
            .context("Invalid bind_host/port")?;

        if self.backend.project_id.trim().is_empty() {
            anyhow::bail!("backend.project_id is required (set PROJECT_ID)");
        }

        if !is_valid_log_id(&self.backend.log_id) {
            anyhow::bail!("Invalid backend.log_id: {:?}", self.backend.log_id);
        }

        if self.backend.max_log_ids == 0 {
            anyhow::bail!("backend.max_log_ids must be at least 1");
        }

        if self.backend.queue_capacity == 0 {
            anyhow::bail!("backend.queue_capacity must be at least 1");
        }

        if let Some(path) = &self.backend.credentials {
            let p = std::path::Path::new(path);
            if !p.exists() {
                anyhow::bail!("Credentials file not found: {}", path);
            }
        }

        Ok(())
    }

    /// Log the effective configuration. Credentials are reported as set/unset only.
    pub fn report(&self) {
        info!(
            bind_address = %self.bind_address(),
            body_limit_bytes = self.server.body_limit_bytes,
            request_timeout_secs = self.server.request_timeout_secs,
            "Server configuration"
        );
        info!(
            project_id = %self.backend.project_id,
            log_id = %self.backend.log_id,
            scope = ?self.backend.scope,
            max_log_ids = self.backend.max_log_ids,
            output = ?self.backend.output,
            queue_capacity = self.backend.queue_capacity,
            credentials = if self.backend.credentials.is_some() { "set" } else { "unset" },
            "Backend configuration"
        );
    }
}

/// Log ids: up to 512 characters from `[A-Za-z0-9/_.-]`.
pub fn is_valid_log_id(log_id: &str) -> bool {
    !log_id.is_empty()
        && log_id.len() <= 512
        && log_id
            .bytes()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, b'/' | b'_' | b'-' | b'.'))
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_host: "0.0.0.0".to_string(),
                port: 8080,
                body_limit_bytes: 2 * 1024 * 1024,
                request_timeout_secs: 30,
            },
            backend: BackendConfig {
                project_id: String::new(),
                log_id: "syslog".to_string(),
                credentials: None,
                scope: SinkScope::Static,
                max_log_ids: crate::sink::DEFAULT_MAX_LOG_IDS,
                queue_capacity: 1024,
                output: EntryOutput::Stdout,
            },
            logging: LoggingConfig {
                level: "info,drain=debug".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
