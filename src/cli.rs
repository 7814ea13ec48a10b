//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::time::Duration;

use crate::ServerConfig;
use crate::db::Database;
use crate::secret::HashCost;
use clap::Parser;
use tracing::{error, info};
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Header a reverse proxy uses to pass on the client address.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    XRealIp,
    XForwardedFor,
    CfConnectingIp,
}

/// Reads the client IP from a proxy header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    pub header_name: &'static str,
    parse: fn(&str) -> Result<String, &'static str>,
}

impl IpExtractor {
    pub fn extract(&self, header_value: &str) -> Result<String, &'static str> {
        (self.parse)(header_value)
    }
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        match header {
            ClientIpHeader::XRealIp => Self {
                header_name: "x-real-ip",
                parse: parse_single_ip,
            },
            ClientIpHeader::XForwardedFor => Self {
                header_name: "x-forwarded-for",
                parse: parse_first_forwarded_ip,
            },
            ClientIpHeader::CfConnectingIp => Self {
                header_name: "cf-connecting-ip",
                parse: parse_single_ip,
            },
        }
    }
}

fn parse_single_ip(value: &str) -> Result<String, &'static str> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| "Invalid IP address in header")
}

fn parse_first_forwarded_ip(value: &str) -> Result<String, &'static str> {
    let first = value.split(',').next().ok_or("Empty forwarded header")?;
    parse_single_ip(first)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "guidauth",
    about = "Access/refresh token issuing service for GUID-identified users"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "guidauth.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime, e.g. "30s", "15m", "1h" or plain seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value = "15m", value_parser = parse_duration)]
    pub access_ttl: Duration,

    /// URL that receives IP change notifications
    #[arg(long, env = "WEBHOOK_URL", value_parser = validate_webhook_url)]
    pub webhook_url: Option<Url>,

    /// Read the client IP from this header (requires running behind a proxy)
    #[arg(long, env = "IP_HEADER")]
    pub ip_header: Option<ClientIpHeader>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Parse durations like "90", "30s", "15m", "1h", "2d".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid duration: {}", s))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(format!("Unknown duration unit '{}' in {}", unit, s)),
    };

    if value == 0 {
        return Err("Duration must be greater than zero".to_string());
    }

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration too large: {}", s))
}

fn validate_webhook_url(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| format!("Invalid webhook URL {}: {}", s, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(format!("Webhook URL must use http or https, got {}", scheme)),
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    jwt_secret: String,
    access_ttl: Duration,
    webhook_url: Option<Url>,
    ip_header: Option<ClientIpHeader>,
) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        access_ttl,
        hash_cost: HashCost::default(),
        webhook_url,
        ip_extractor: ip_header.map(IpExtractor::from),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
