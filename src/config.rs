use serde::Deserialize;
use std::time::Duration;

use crate::dispatcher::Pacing;

/// SMTP sender credentials. Email dispatch is disabled when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// WhatsApp Business (Graph API) credentials. WhatsApp dispatch is disabled when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppSettings {
    pub base_url: String,
    pub phone_number_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_max_tokens: u32,
    /// Name the outreach copy is signed with.
    pub sender_name: String,
    pub serpapi_base_url: String,
    pub serpapi_key: String,
    pub smtp: Option<SmtpSettings>,
    pub whatsapp: Option<WhatsAppSettings>,
    pub dispatch_min_delay_secs: u64,
    pub dispatch_max_delay_secs: u64,
    pub dispatch_long_pause_every: usize,
    pub dispatch_long_pause_secs: u64,
    pub http_timeout_secs: u64,
    pub description_cache_ttl_secs: u64,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url(name: &str, url: String) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn number<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = optional("DB_URL")
            .or_else(|| optional("DATABASE_URL"))
            .map(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })
            .transpose()?;

        let smtp = match optional("SMTP_HOST") {
            Some(host) => {
                let username = required("SMTP_USERNAME")?;
                Some(SmtpSettings {
                    host,
                    port: number("SMTP_PORT", 587u16)?,
                    from: optional("SMTP_FROM").unwrap_or_else(|| username.clone()),
                    username,
                    password: required("SMTP_PASSWORD")?,
                })
            }
            None => None,
        };

        let whatsapp = match (
            optional("WHATSAPP_PHONE_NUMBER_ID"),
            optional("WHATSAPP_ACCESS_TOKEN"),
        ) {
            (Some(phone_number_id), Some(access_token)) => Some(WhatsAppSettings {
                base_url: http_url(
                    "WHATSAPP_API_BASE_URL",
                    optional("WHATSAPP_API_BASE_URL")
                        .unwrap_or_else(|| "https://graph.facebook.com/v19.0".to_string()),
                )?,
                phone_number_id,
                access_token,
            }),
            _ => None,
        };

        let config = Self {
            database_url,
            port: number("PORT", 3000u16)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            llm_base_url: http_url("LLM_BASE_URL", required("LLM_BASE_URL")?)?,
            llm_api_key: required("LLM_API_KEY")?,
            llm_model: optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_max_tokens: number("LLM_MAX_TOKENS", 600u32)?,
            sender_name: optional("SENDER_NAME").unwrap_or_else(|| "The Partnerships Team".to_string()),
            serpapi_base_url: http_url(
                "SERPAPI_BASE_URL",
                optional("SERPAPI_BASE_URL").unwrap_or_else(|| "https://serpapi.com".to_string()),
            )?,
            serpapi_key: required("SERPAPI_KEY")?,
            smtp,
            whatsapp,
            dispatch_min_delay_secs: number("DISPATCH_MIN_DELAY_SECS", 5u64)?,
            dispatch_max_delay_secs: number("DISPATCH_MAX_DELAY_SECS", 15u64)?,
            dispatch_long_pause_every: number("DISPATCH_LONG_PAUSE_EVERY", 50usize)?,
            dispatch_long_pause_secs: number("DISPATCH_LONG_PAUSE_SECS", 300u64)?,
            http_timeout_secs: number("HTTP_TIMEOUT_SECS", 30u64)?,
            description_cache_ttl_secs: number("DESCRIPTION_CACHE_TTL_SECS", 604_800u64)?,
        };

        if config.dispatch_min_delay_secs > config.dispatch_max_delay_secs {
            anyhow::bail!("DISPATCH_MIN_DELAY_SECS cannot exceed DISPATCH_MAX_DELAY_SECS");
        }
        if config.dispatch_long_pause_every == 0 {
            anyhow::bail!("DISPATCH_LONG_PAUSE_EVERY must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if let Some(ref url) = config.database_url {
            tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]);
        } else {
            tracing::warn!("No DATABASE_URL configured, leads will be kept in memory only");
        }
        tracing::debug!("LLM Base URL: {}", config.llm_base_url);
        tracing::debug!("SerpAPI Base URL: {}", config.serpapi_base_url);
        if config.smtp.is_none() {
            tracing::warn!("SMTP not configured, email dispatch disabled");
        }
        if config.whatsapp.is_none() {
            tracing::warn!("WhatsApp credentials not configured, WhatsApp dispatch disabled");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            min_delay: Duration::from_secs(self.dispatch_min_delay_secs),
            max_delay: Duration::from_secs(self.dispatch_max_delay_secs),
            long_pause_every: self.dispatch_long_pause_every,
            long_pause: Duration::from_secs(self.dispatch_long_pause_secs),
        }
    }
}
