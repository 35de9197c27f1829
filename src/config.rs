//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::mailer::SmtpConfig;
use crate::store::UpstashConfig;
use crate::worker::{SkipPolicy, WorkerConfig};

/// Storage keys and retention caps.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    pub queue: String,
    pub settings: String,
    pub outbox: String,
    pub log: String,
    pub worker_last_run: String,
    pub outbox_max: u64,
    pub log_max: u64,
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self {
            queue: "responder:jobs".to_string(),
            settings: "responder:settings".to_string(),
            outbox: "responder:outbox".to_string(),
            log: "responder:logs".to_string(),
            worker_last_run: "responder:worker:lastRun".to_string(),
            outbox_max: 5000,
            log_max: 2000,
        }
    }
}

/// Full service configuration, read from the environment.
pub struct AppConfig {
    pub port: u16,
    /// REST store; `None` falls back to the non-durable in-memory store.
    pub upstash: Option<UpstashConfig>,
    pub keys: StoreKeys,
    pub smtp: Option<SmtpConfig>,
    pub llm: Option<LlmConfig>,
    pub worker: WorkerConfig,
    /// Periodic drain interval; zero disables the ticker.
    pub worker_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_env("PORT", 8080)?;

        let upstash = match std::env::var("UPSTASH_REDIS_REST_URL") {
            Ok(base_url) if !base_url.is_empty() => {
                let token = std::env::var("UPSTASH_REDIS_REST_TOKEN")
                    .map_err(|_| ConfigError::MissingEnvVar("UPSTASH_REDIS_REST_TOKEN".into()))?;
                Some(UpstashConfig {
                    base_url,
                    token: SecretString::from(token),
                })
            }
            _ => None,
        };

        let mut keys = StoreKeys::default();
        if let Ok(key) = std::env::var("QUEUE_KEY") {
            keys.queue = key;
        }
        if let Ok(key) = std::env::var("SETTINGS_KEY") {
            keys.settings = key;
        }
        if let Ok(key) = std::env::var("OUTBOX_KEY") {
            keys.outbox = key;
        }
        if let Ok(key) = std::env::var("LOG_KEY") {
            keys.log = key;
        }
        keys.outbox_max = parse_env("OUTBOX_MAX", keys.outbox_max)?;
        keys.log_max = parse_env("LOG_MAX", keys.log_max)?;

        let worker = WorkerConfig {
            max_batch: parse_env("WORKER_MAX_BATCH", 25)?,
            min_interval: Duration::from_secs(parse_env("WORKER_MIN_INTERVAL_SECS", 0u64)?),
            skip_policy: match std::env::var("WORKER_SKIP_POLICY") {
                Ok(raw) => SkipPolicy::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: "WORKER_SKIP_POLICY".into(),
                    message: format!("expected 'continue' or 'stop', got '{raw}'"),
                })?,
                Err(_) => SkipPolicy::default(),
            },
        };

        Ok(Self {
            port,
            upstash,
            keys,
            smtp: SmtpConfig::from_env(),
            llm: llm_from_env()?,
            worker,
            worker_interval: Duration::from_secs(parse_env("WORKER_INTERVAL_SECS", 0u64)?),
        })
    }
}

fn llm_from_env() -> Result<Option<LlmConfig>, ConfigError> {
    let backend = match std::env::var("AI_BACKEND").as_deref() {
        Ok("anthropic") => LlmBackend::Anthropic,
        Ok("openai") | Err(_) => LlmBackend::OpenAi,
        Ok(other) => {
            return Err(ConfigError::InvalidValue {
                key: "AI_BACKEND".into(),
                message: format!("expected 'openai' or 'anthropic', got '{other}'"),
            });
        }
    };

    let (key_var, default_model) = match backend {
        LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
        LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-sonnet-4-20250514"),
    };

    // A missing key is not an error: generation is an optional capability.
    let Ok(api_key) = std::env::var(key_var) else {
        return Ok(None);
    };

    Ok(Some(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model: std::env::var("AI_MODEL").unwrap_or_else(|_| default_model.to_string()),
        max_tokens: parse_env("AI_MAX_TOKENS", 200u64)?,
    }))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
