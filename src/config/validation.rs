use crate::config::types::{
    Config, CoordinatorConfig, FetcherConfig, SessionConfig, StorageConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Upper bound on the stale-claim threshold (one week)
const MAX_STALE_CLAIM_SECS: u64 = 7 * 24 * 60 * 60;

/// Slack a claim gets beyond the longest possible fetch, for extraction and store writes
const STALE_CLAIM_MARGIN_SECS: u64 = 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_session_config(&config.session)?;
    validate_coordinator_config(&config.coordinator)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    validate_stale_threshold(config)?;
    Ok(())
}

/// A live worker must never hold a claim long enough for it to look abandoned
fn validate_stale_threshold(config: &Config) -> Result<(), ConfigError> {
    let worst_case = config.fetcher.worst_case_fetch().as_millis().div_ceil(1000) as u64;
    let required = worst_case.saturating_add(STALE_CLAIM_MARGIN_SECS);

    if config.coordinator.stale_claim_after_secs < required {
        return Err(ConfigError::Validation(format!(
            "stale_claim_after_secs ({}) must be >= {} (a fetch may take up to {}s)",
            config.coordinator.stale_claim_after_secs, required, worst_case
        )));
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.initial_budget < 1 {
        return Err(ConfigError::Validation(format!(
            "initial_budget must be >= 1, got {}",
            config.initial_budget
        )));
    }

    Ok(())
}

/// Validates worker and polling settings
fn validate_coordinator_config(config: &CoordinatorConfig) -> Result<(), ConfigError> {
    if config.worker_count < 1 || config.worker_count > 64 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 64, got {}",
            config.worker_count
        )));
    }

    if config.claim_poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "claim_poll_interval_ms must be > 0".to_string(),
        ));
    }

    if config.claim_poll_max_ms < config.claim_poll_interval_ms {
        return Err(ConfigError::Validation(format!(
            "claim_poll_max_ms ({}) must be >= claim_poll_interval_ms ({})",
            config.claim_poll_max_ms, config.claim_poll_interval_ms
        )));
    }

    if config.session_poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "session_poll_interval_ms must be > 0".to_string(),
        ));
    }

    if config.stale_claim_after_secs == 0 || config.stale_claim_after_secs > MAX_STALE_CLAIM_SECS {
        return Err(ConfigError::Validation(format!(
            "stale_claim_after_secs must be between 1 and {}, got {}",
            MAX_STALE_CLAIM_SECS, config.stale_claim_after_secs
        )));
    }

    if config.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "idle_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.store_retry_base_ms == 0 {
        return Err(ConfigError::Validation(
            "store_retry_base_ms must be > 0".to_string(),
        ));
    }

    if config.store_retry_max_ms < config.store_retry_base_ms {
        return Err(ConfigError::Validation(format!(
            "store_retry_max_ms ({}) must be >= store_retry_base_ms ({})",
            config.store_retry_max_ms, config.store_retry_base_ms
        )));
    }

    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
