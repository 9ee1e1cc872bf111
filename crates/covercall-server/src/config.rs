//! Operational configuration (flags + environment)

use std::net::SocketAddr;

use clap::Parser;

/// covercall server configuration. Every knob can come from the
/// environment, which is how production deployments set them.
#[derive(Parser, Debug, Clone)]
#[command(name = "covercall-server", about = "Shift-filling escalation server")]
pub struct ServerConfig {
    /// Socket the HTTP server binds.
    #[arg(long, env = "COVERCALL_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Public base URL the carrier reaches us on.
    #[arg(long, env = "COVERCALL_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Records API endpoint and key.
    #[arg(long, env = "RECORDS_API_URL", default_value = "http://localhost:9100")]
    pub records_api_url: String,
    #[arg(long, env = "RECORDS_API_KEY", default_value = "")]
    pub records_api_key: String,

    /// Carrier REST credentials.
    #[arg(long, env = "CARRIER_API_URL", default_value = "https://api.carrier.example")]
    pub carrier_api_url: String,
    #[arg(long, env = "CARRIER_ACCOUNT_SID", default_value = "")]
    pub carrier_account_sid: String,
    #[arg(long, env = "CARRIER_AUTH_TOKEN", default_value = "")]
    pub carrier_auth_token: String,

    /// TTS service credentials.
    #[arg(long, env = "TTS_API_URL", default_value = "https://tts.example")]
    pub tts_api_url: String,
    #[arg(long, env = "TTS_API_KEY", default_value = "")]
    pub tts_api_key: String,

    /// Durable queue / engine database.
    #[arg(long, env = "QUEUE_DB_URL", default_value = "sqlite:covercall.db?mode=rwc")]
    pub queue_db_url: String,

    /// Recording archive.
    #[arg(long, env = "OBJECT_STORE_URL", default_value = "https://archive.example")]
    pub object_store_url: String,
    #[arg(long, env = "OBJECT_STORE_KEY", default_value = "")]
    pub object_store_key: String,

    /// Comma-separated E.164 country prefixes staff numbers must match.
    #[arg(long, env = "ALLOWED_COUNTRY_PREFIXES", default_value = "+61")]
    pub allowed_country_prefixes: String,

    /// Hours terminal jobs stay visible before reaping.
    #[arg(long, env = "RETENTION_HOURS", default_value_t = 24)]
    pub retention_hours: u64,

    /// Idle call-session TTL, seconds.
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = 3600)]
    pub session_ttl_secs: u64,

    /// Run against in-memory fakes (no external services). For local
    /// development and tests.
    #[arg(long, env = "COVERCALL_IN_MEMORY", default_value_t = false)]
    pub in_memory: bool,
}

impl ServerConfig {
    pub fn prefixes(&self) -> Vec<String> {
        self.allowed_country_prefixes
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Defaults suitable for tests: in-memory everything.
    pub fn for_tests() -> Self {
        let mut config = Self::parse_from(["covercall-server"]);
        config.in_memory = true;
        config.queue_db_url = "sqlite::memory:".to_string();
        config
    }
}
