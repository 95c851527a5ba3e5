use std::time::Duration;

/// Runtime configuration, resolved once at startup from environment
/// variables (with `.env` support via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    /// Host the HTTP server binds to
    pub host: String,
    /// Port the HTTP server listens on
    pub port: u16,
    /// Path to the SQLite database file
    pub database_path: String,
    /// Path to the static service-definition file
    pub services_file: String,
    /// Binary launched for agent runs and chat turns
    pub agent_binary: String,
    /// Grace period between SIGTERM and SIGKILL when stopping a process
    pub stop_grace: Duration,
    /// Interval between Store polls while a question waits for an answer
    pub question_poll_interval: Duration,
    /// Overall cap on how long a question may wait before it times out
    pub question_timeout: Duration,
    /// Window after which a silent WebSocket client is dropped
    pub ws_liveness_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env_str("AGENTDECK_HOST", "127.0.0.1"),
            port: env_parse("AGENTDECK_PORT", 8420)?,
            database_path: env_str("AGENTDECK_DB_PATH", ".agentdeck/dashboard.db"),
            services_file: env_str("AGENTDECK_SERVICES_FILE", ".agentdeck/services.toml"),
            agent_binary: env_str("AGENT_BINARY", "claude"),
            stop_grace: Duration::from_secs(env_parse("AGENTDECK_STOP_GRACE_SECS", 5)?),
            question_poll_interval: Duration::from_millis(env_parse(
                "AGENTDECK_QUESTION_POLL_MS",
                2000,
            )?),
            question_timeout: Duration::from_secs(env_parse(
                "AGENTDECK_QUESTION_TIMEOUT_SECS",
                30 * 60,
            )?),
            ws_liveness_timeout: Duration::from_secs(env_parse(
                "AGENTDECK_WS_LIVENESS_SECS",
                60,
            )?),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
