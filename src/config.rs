use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Book authoring service with PDF/EPUB export and plan-based billing.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKFORGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new account.
    Add {
        /// Login email.
        email: String,
        /// Display name.
        #[arg(short, long)]
        name: Option<String>,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Delete an account.
    Del {
        /// Email of the account to delete.
        email: String,
    },

    /// List all accounts.
    List,

    /// Change an account password.
    Passwd {
        /// Login email.
        email: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Billing provider configuration.
    #[serde(default)]
    pub billing: BillingConfig,

    /// Export configuration.
    #[serde(default)]
    pub export: ExportConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Public frontend base URL, used for checkout redirects.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            frontend_url: default_frontend_url(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_frontend_url() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/bookforge.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Billing provider configuration. Secrets may also come from the
/// BOOKFORGE_BILLING_SECRET_KEY / BOOKFORGE_WEBHOOK_SECRET environment
/// variables, which take precedence over the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Provider API base URL.
    #[serde(default = "default_billing_api_base")]
    pub api_base: String,

    /// API secret key.
    #[serde(default)]
    pub secret_key: String,

    /// Webhook endpoint signing secret.
    #[serde(default)]
    pub webhook_secret: String,

    /// Price ID for the PRO monthly plan.
    #[serde(default)]
    pub price_pro_monthly: String,

    /// Price ID for the PRO yearly plan.
    #[serde(default)]
    pub price_pro_yearly: String,

    /// Acceptance window for webhook signature timestamps, in seconds.
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            api_base: default_billing_api_base(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            price_pro_monthly: String::new(),
            price_pro_yearly: String::new(),
            signature_tolerance_secs: default_signature_tolerance(),
        }
    }
}

fn default_billing_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_signature_tolerance() -> i64 {
    crate::billing::signature::DEFAULT_TOLERANCE_SECS
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory for generated artifacts.
    #[serde(default = "default_export_dir")]
    pub output_dir: PathBuf,

    /// Directory for uploaded cover images.
    #[serde(default = "default_covers_dir")]
    pub covers_dir: PathBuf,

    /// Per-export generation timeout in seconds.
    #[serde(default = "default_export_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_export_dir(),
            covers_dir: default_covers_dir(),
            timeout_seconds: default_export_timeout(),
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("data/exports")
}

fn default_covers_dir() -> PathBuf {
    PathBuf::from("data/covers")
}

fn default_export_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from file, then overlay secret environment
    /// variables when set.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.overlay_env();
        Ok(config)
    }

    /// Apply environment overrides for secrets.
    pub fn overlay_env(&mut self) {
        if let Ok(key) = std::env::var("BOOKFORGE_BILLING_SECRET_KEY") {
            self.billing.secret_key = key;
        }
        if let Ok(secret) = std::env::var("BOOKFORGE_WEBHOOK_SECRET") {
            self.billing.webhook_secret = secret;
        }
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("bookforge.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookforge").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookforge/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookforge configuration

[server]
bind = "0.0.0.0:8080"
# Public base URL used for checkout redirect links
frontend_url = "http://localhost:8080"

[database]
# path = "/var/lib/bookforge/bookforge.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30

[billing]
# api_base = "https://api.stripe.com"
# Secrets can also be set via BOOKFORGE_BILLING_SECRET_KEY and
# BOOKFORGE_WEBHOOK_SECRET environment variables.
# secret_key = "sk_live_..."
# webhook_secret = "whsec_..."
# price_pro_monthly = "price_..."
# price_pro_yearly = "price_..."

[export]
# output_dir = "/var/lib/bookforge/exports"
# covers_dir = "/var/lib/bookforge/covers"
timeout_seconds = 300
"#
        .to_string()
    }
}
