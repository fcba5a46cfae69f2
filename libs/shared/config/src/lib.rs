use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_pool_size: u32,
    pub port: u16,
    pub jwt_secret: String,
    pub allow_origins: Vec<String>,
    pub paystack_secret_key: String,
    pub paystack_base_url: String,
    pub email_host: String,
    pub email_port: u16,
    pub gmail_username: String,
    pub gmail_app_password: String,
    pub email_from_address: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub redis_url: Option<String>,
    pub cache_prefix: String,
    pub cache_default_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub rate_limit_per_second: u64,
    /// Rescheduling fee in minor units; zero disables fee rows.
    pub reschedule_fee_minor: i64,
    pub default_currency: String,
    pub reminder_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            database_url: env::var("DB_URL")
                .unwrap_or_else(|_| {
                    warn!("DB_URL not set, falling back to in-memory store");
                    String::new()
                }),
            db_pool_size: parse_or("DB_POOL_SIZE", 10),
            port: parse_or("PORT", 8080),
            jwt_secret: env::var("JWT_SECRET_KEY")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET_KEY not set, using empty value");
                    String::new()
                }),
            allow_origins: env::var("ALLOW_ORIGINS")
                .map(|origins| split_origins(&origins))
                .unwrap_or_else(|_| vec!["*".to_string()]),
            paystack_secret_key: env::var("PAYSTACK_SECRET_KEY")
                .unwrap_or_else(|_| {
                    warn!("PAYSTACK_SECRET_KEY not set, using empty value");
                    String::new()
                }),
            paystack_base_url: env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            email_host: env::var("EMAIL_HOST").unwrap_or_default(),
            email_port: parse_or("EMAIL_PORT", 587),
            gmail_username: env::var("GMAIL_USERNAME").unwrap_or_default(),
            gmail_app_password: env::var("GMAIL_APP_PASSWORD").unwrap_or_default(),
            email_from_address: env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "no-reply@diagnostic.local".to_string()),
            openai_api_key: env::var("OPEN_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("OPEN_API_KEY not set, AI operations will be unavailable");
                    String::new()
                }),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            cache_prefix: env::var("CACHE_PREFIX")
                .unwrap_or_else(|_| "diagnostic_ai".to_string()),
            cache_default_ttl_secs: parse_or("CACHE_DEFAULT_TTL", 3600),
            request_timeout_secs: parse_or("REQUEST_TIMEOUT", 30),
            rate_limit_per_second: parse_or("RATE_LIMIT_PER_SECOND", 100),
            reschedule_fee_minor: env::var("RESCHEDULE_FEE")
                .ok()
                .and_then(|fee| parse_minor_units(&fee))
                .unwrap_or(0),
            default_currency: env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "NGN".to_string()),
            reminder_interval_secs: parse_or("REMINDER_INTERVAL", 3600),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty() && self.is_payment_configured()
    }

    pub fn is_payment_configured(&self) -> bool {
        !self.paystack_secret_key.is_empty() && !self.paystack_base_url.is_empty()
    }

    pub fn uses_database(&self) -> bool {
        !self.database_url.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_pool_size: 10,
            port: 8080,
            jwt_secret: String::new(),
            allow_origins: vec!["*".to_string()],
            paystack_secret_key: String::new(),
            paystack_base_url: "https://api.paystack.co".to_string(),
            email_host: String::new(),
            email_port: 587,
            gmail_username: String::new(),
            gmail_app_password: String::new(),
            email_from_address: "no-reply@diagnostic.local".to_string(),
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            redis_url: None,
            cache_prefix: "diagnostic_ai".to_string(),
            cache_default_ttl_secs: 3600,
            request_timeout_secs: 30,
            rate_limit_per_second: 100,
            reschedule_fee_minor: 0,
            default_currency: "NGN".to_string(),
            reminder_interval_secs: 3600,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value, using default", key);
            default
        }),
        Err(_) => default,
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

/// Parses a decimal amount in major units ("50", "50.5", "50.25") into minor units.
/// More than two fractional digits or a negative sign is rejected.
pub fn parse_minor_units(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('-') {
        return None;
    }

    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };

    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    whole.checked_mul(100)?.checked_add(fraction)
}
