//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, renewal window, poll delays)
//! - Hostname syntax checks for the configured host set
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: FrontConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::FrontConfig;

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("acme.directory_url {0:?} is not a valid http(s) URL")]
    InvalidDirectoryUrl(String),
    #[error("acme.cache_dir must not be empty")]
    EmptyCacheDir,
    #[error("acme.renew_before_days must be at least 1")]
    RenewalWindowTooSmall,
    #[error("acme.poll_max_delay_ms must be >= acme.poll_base_delay_ms")]
    PollDelaysInverted,
    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &FrontConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match url::Url::parse(&config.acme.directory_url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
        _ => errors.push(ValidationError::InvalidDirectoryUrl(
            config.acme.directory_url.clone(),
        )),
    }

    if config.acme.cache_dir.is_empty() {
        errors.push(ValidationError::EmptyCacheDir);
    }

    if config.acme.renew_before_days == 0 {
        errors.push(ValidationError::RenewalWindowTooSmall);
    }

    if config.acme.poll_max_delay_ms < config.acme.poll_base_delay_ms {
        errors.push(ValidationError::PollDelaysInverted);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Syntactic DNS-name check for host set entries.
///
/// Accepts absolute names without the trailing dot: 1-63 octet labels of
/// letters, digits and interior hyphens, at most 253 octets overall.
/// Single-label names are allowed (the original tool serves them too).
pub fn is_valid_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&FrontConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = FrontConfig::default();
        config.acme.directory_url = "not a url".to_string();
        config.acme.cache_dir = String::new();
        config.acme.renew_before_days = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::EmptyCacheDir));
    }

    #[test]
    fn inverted_poll_delays_rejected() {
        let mut config = FrontConfig::default();
        config.acme.poll_base_delay_ms = 5_000;
        config.acme.poll_max_delay_ms = 100;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::PollDelaysInverted]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = FrontConfig::default();
        config.observability.metrics_address = "nope".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn dns_name_syntax() {
        assert!(is_valid_dns_name("example.test"));
        assert!(is_valid_dns_name("a.b-c.example"));
        assert!(is_valid_dns_name("localhost"));
        assert!(is_valid_dns_name("xn--bcher-kva.example"));

        assert!(!is_valid_dns_name(""));
        assert!(!is_valid_dns_name("exa mple.test"));
        assert!(!is_valid_dns_name("-leading.example"));
        assert!(!is_valid_dns_name("trailing-.example"));
        assert!(!is_valid_dns_name("double..dot"));
        assert!(!is_valid_dns_name(&"a".repeat(64)));
    }
}
