use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Bazaar conversation server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "bazaar-chat", version, about = "Bazaar conversation server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "BAZAAR_PORT", default_value = "4860")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "BAZAAR_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./bazaar.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "BAZAAR_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "BAZAAR_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Token the marketplace platform presents on the directory sync
    /// endpoint. Auto-generated under data_dir on first boot if empty.
    #[arg(long, env = "BAZAAR_SERVICE_TOKEN", default_value = "")]
    pub service_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4860,
            bind_address: "0.0.0.0".to_string(),
            config: "./bazaar.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            service_token: String::new(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (BAZAAR_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("BAZAAR_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Bazaar Conversation Server Configuration
# Place this file at ./bazaar.toml or specify with --config <path>
# All settings can be overridden via environment variables (BAZAAR_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4860)
# port = 4860

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and signing keys
# data_dir = "./data"

# Service token the marketplace platform must present on
# POST /api/directory/profiles. Auto-generated under data_dir on first
# boot if left empty; the generated value is logged at startup.
# service_token = ""
"#
    .to_string()
}
