use serde::Deserialize;

/// Runtime configuration, loaded from the environment.
///
/// Only `DATABASE_URL` is mandatory. Every integration key is optional:
/// an unconfigured collaborator degrades to a soft "not configured"
/// failure (notifications) or a deterministic mock (credit bureau,
/// payment gateway) instead of blocking startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// AI voice-call provider (Bland-compatible API).
    pub call_api_base_url: String,
    pub call_api_key: Option<String>,
    /// AI content generation (OpenRouter-compatible chat API).
    pub openrouter_base_url: String,
    pub openrouter_api_key: Option<String>,
    /// Transactional email provider (Resend-compatible API).
    pub email_api_base_url: String,
    pub email_api_key: Option<String>,
    pub email_from: String,
    /// Payment gateway (Razorpay-compatible API). All three values must be
    /// present for real payouts; otherwise transfers run in mock mode.
    pub razorpay_base_url: String,
    pub razorpay_key_id: Option<String>,
    pub razorpay_key_secret: Option<String>,
    pub razorpay_account_number: Option<String>,
    /// Credit bureau. Unset means the deterministic mock bureau.
    pub cibil_base_url: Option<String>,
    pub cibil_api_key: Option<String>,
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn base_url_env(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            call_api_base_url: base_url_env("CALL_API_BASE_URL", "https://api.bland.ai")?,
            call_api_key: optional_env("CALL_API_KEY"),
            openrouter_base_url: base_url_env("OPENROUTER_BASE_URL", "https://openrouter.ai/api")?,
            openrouter_api_key: optional_env("OPENROUTER_API_KEY"),
            email_api_base_url: base_url_env("EMAIL_API_BASE_URL", "https://api.resend.com")?,
            email_api_key: optional_env("EMAIL_API_KEY"),
            email_from: std::env::var("EMAIL_FROM")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "CRM Team <no-reply@crm.example.com>".to_string()),
            razorpay_base_url: base_url_env("RAZORPAY_BASE_URL", "https://api.razorpay.com")?,
            razorpay_key_id: optional_env("RAZORPAY_KEY_ID"),
            razorpay_key_secret: optional_env("RAZORPAY_KEY_SECRET"),
            razorpay_account_number: optional_env("RAZORPAY_ACCOUNT_NUMBER"),
            cibil_base_url: match optional_env("CIBIL_BASE_URL") {
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    anyhow::bail!("CIBIL_BASE_URL must start with http:// or https://")
                }
                other => other.map(|u| u.trim_end_matches('/').to_string()),
            },
            cibil_api_key: optional_env("CIBIL_API_KEY"),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Server Port: {}", config.port);
        tracing::info!(
            "AI calling: {}",
            if config.call_api_key.is_some() { "configured" } else { "disabled (no CALL_API_KEY)" }
        );
        tracing::info!(
            "Email sending: {}",
            if config.email_api_key.is_some() { "configured" } else { "disabled (no EMAIL_API_KEY)" }
        );
        tracing::info!(
            "AI email generation: {}",
            if config.openrouter_api_key.is_some() { "configured" } else { "template fallback only" }
        );
        tracing::info!(
            "Payment gateway: {}",
            if config.payment_gateway_configured() { "live" } else { "mock mode" }
        );
        tracing::info!(
            "Credit bureau: {}",
            if config.cibil_base_url.is_some() { "remote" } else { "deterministic mock" }
        );

        Ok(config)
    }

    /// True when all Razorpay credentials are present and real payouts can run.
    pub fn payment_gateway_configured(&self) -> bool {
        self.razorpay_key_id.is_some()
            && self.razorpay_key_secret.is_some()
            && self.razorpay_account_number.is_some()
    }
}
