//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the front
//! door. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::acme::directories;

/// Root configuration for the front door.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FrontConfig {
    /// Listener configuration (ports, connection limits).
    pub listener: ListenerConfig,

    /// ACME issuance settings.
    pub acme: AcmeSettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
///
/// One encrypted and one plaintext listener is bound per resolved address;
/// the ports here apply to every address.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port for the encrypted (TLS) listeners.
    pub https_port: u16,

    /// Port for the plaintext (redirect / challenge) listeners.
    pub http_port: u16,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            https_port: 443,
            http_port: 80,
            max_connections: 10_000,
        }
    }
}

/// ACME issuance settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcmeSettings {
    /// ACME directory endpoint.
    pub directory_url: String,

    /// Contact email registered with the ACME account, if any.
    pub contact_email: Option<String>,

    /// Directory holding the certificate cache and account credentials.
    pub cache_dir: String,

    /// Renew when remaining validity drops below this many days.
    pub renew_before_days: u32,

    /// Upper bound on waiting for a domain-validation challenge to settle.
    pub challenge_timeout_secs: u64,

    /// Base delay for the authorization/order poll backoff.
    pub poll_base_delay_ms: u64,

    /// Cap on the poll backoff delay.
    pub poll_max_delay_ms: u64,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            directory_url: directories::LETS_ENCRYPT_PRODUCTION.to_string(),
            contact_email: None,
            // The original tool caches next to the binary; stay compatible.
            cache_dir: ".".to_string(),
            renew_before_days: 30,
            challenge_timeout_secs: 120,
            poll_base_delay_ms: 500,
            poll_max_delay_ms: 8_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
