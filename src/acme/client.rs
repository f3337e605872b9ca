//! ACME issuance state machine built on `instant-acme`.
//!
//! # Responsibilities
//! - Ensure a single ACME account per process (created lazily, persisted)
//! - Drive an order through challenge, finalization and download
//! - Register HTTP-01 responses for exactly the pending-challenge window
//! - Classify failures as retryable or terminal

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AccountCredentials, Authorization, AuthorizationStatus, ChallengeType, Identifier,
    NewAccount, NewOrder, Order, OrderStatus,
};
use tokio::sync::OnceCell;

use crate::acme::backoff::calculate_backoff;
use crate::acme::{AcmeError, AcmeErrorKind, IssuedCert, Issuer};
use crate::cert::challenge::ChallengeRegistry;
use crate::cert::store::CertStore;
use crate::config::AcmeSettings;

/// ACME protocol client.
///
/// Holds the shared account handle; per-issuance order state stays on the
/// stack of [`AcmeClient::issue`] and is discarded when it returns.
pub struct AcmeClient {
    settings: AcmeSettings,
    store: CertStore,
    challenges: ChallengeRegistry,
    account: OnceCell<Account>,
}

impl AcmeClient {
    pub fn new(settings: AcmeSettings, store: CertStore, challenges: ChallengeRegistry) -> Self {
        Self {
            settings,
            store,
            challenges,
            account: OnceCell::new(),
        }
    }

    /// AccountEnsure: load the persisted account or register a new one.
    ///
    /// `OnceCell` serializes concurrent first-time issuances so registration
    /// happens at most once per process lifetime; later callers share the
    /// handle read-only.
    async fn account(&self) -> Result<&Account, AcmeError> {
        self.account
            .get_or_try_init(|| async {
                if let Some(json) = self
                    .store
                    .load_account()
                    .map_err(|e| AcmeError::new(AcmeErrorKind::Protocol, "account-load", e.to_string()))?
                {
                    let credentials: AccountCredentials = serde_json::from_str(&json).map_err(|e| {
                        AcmeError::new(AcmeErrorKind::Protocol, "account-load", e.to_string())
                    })?;
                    let account = Account::from_credentials(credentials)
                        .await
                        .map_err(|e| classify("account-load", &e))?;
                    tracing::debug!("loaded persisted ACME account");
                    return Ok(account);
                }

                let contact = self
                    .settings
                    .contact_email
                    .as_ref()
                    .map(|email| format!("mailto:{}", email));
                let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

                let (account, credentials) = Account::create(
                    &NewAccount {
                        contact: &contact_refs,
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    &self.settings.directory_url,
                    None,
                )
                .await
                .map_err(|e| classify("account-create", &e))?;

                let json = serde_json::to_string_pretty(&credentials).map_err(|e| {
                    AcmeError::new(AcmeErrorKind::Protocol, "account-create", e.to_string())
                })?;
                self.store.save_account(&json).map_err(|e| {
                    AcmeError::new(AcmeErrorKind::Protocol, "account-create", e.to_string())
                })?;

                tracing::info!(
                    directory = %self.settings.directory_url,
                    "registered new ACME account"
                );
                Ok(account)
            })
            .await
    }

    /// ChallengeWait: poll authorization status until every one settles.
    async fn wait_for_authorizations(&self, order: &mut Order) -> Result<(), AcmeError> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.challenge_timeout_secs);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tokio::time::sleep(calculate_backoff(
                attempt,
                self.settings.poll_base_delay_ms,
                self.settings.poll_max_delay_ms,
            ))
            .await;

            if Instant::now() >= deadline {
                return Err(AcmeError::new(
                    AcmeErrorKind::ChallengeTimeout,
                    "challenge-wait",
                    "domain validation did not settle before the deadline",
                ));
            }

            let authorizations = match order.authorizations().await {
                Ok(authorizations) => authorizations,
                Err(e) => {
                    let err = classify("challenge-wait", &e);
                    if err.is_retryable() {
                        tracing::debug!(error = %err, "authorization poll failed, retrying");
                        continue;
                    }
                    return Err(err);
                }
            };

            if authorizations
                .iter()
                .any(|a| matches!(a.status, AuthorizationStatus::Invalid))
            {
                return Err(AcmeError::new(
                    AcmeErrorKind::RejectedByServer,
                    "challenge-wait",
                    "authorization became invalid",
                ));
            }
            if authorizations
                .iter()
                .all(|a| matches!(a.status, AuthorizationStatus::Valid))
            {
                return Ok(());
            }
        }
    }

    /// FinalizeOrder tail: poll the order until the certificate is ready,
    /// then download it.
    async fn wait_for_certificate(&self, order: &mut Order) -> Result<String, AcmeError> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.challenge_timeout_secs);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tokio::time::sleep(calculate_backoff(
                attempt,
                self.settings.poll_base_delay_ms,
                self.settings.poll_max_delay_ms,
            ))
            .await;

            if Instant::now() >= deadline {
                return Err(AcmeError::new(
                    AcmeErrorKind::ChallengeTimeout,
                    "finalize-wait",
                    "order did not become valid before the deadline",
                ));
            }

            if let Err(e) = order.refresh().await {
                let err = classify("finalize-wait", &e);
                if err.is_retryable() {
                    tracing::debug!(error = %err, "order poll failed, retrying");
                    continue;
                }
                return Err(err);
            }

            match order.state().status {
                OrderStatus::Valid => {
                    return order
                        .certificate()
                        .await
                        .map_err(|e| classify("certificate-download", &e))?
                        .ok_or_else(|| {
                            AcmeError::new(
                                AcmeErrorKind::Protocol,
                                "certificate-download",
                                "order valid but no certificate returned",
                            )
                        });
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::new(
                        AcmeErrorKind::RejectedByServer,
                        "finalize-wait",
                        "order became invalid",
                    ));
                }
                _ => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl Issuer for AcmeClient {
    async fn issue(&self, hostname: &str) -> Result<IssuedCert, AcmeError> {
        let account = self.account().await?;

        // OrderCreate
        let identifier = Identifier::Dns(hostname.to_string());
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &[identifier],
            })
            .await
            .map_err(|e| classify("order-create", &e))?;

        // ChallengeFetch + ChallengeRespond. The registry guards unregister
        // the tokens when dropped, on success and failure alike.
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| classify("challenge-fetch", &e))?;
        let mut guards = Vec::new();
        for authz in &authorizations {
            match &authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AcmeError::new(
                        AcmeErrorKind::RejectedByServer,
                        "challenge-fetch",
                        format!("authorization in unexpected state {:?}", status),
                    ));
                }
            }

            let challenge = http01_challenge(authz)?;
            let key_authorization = order.key_authorization(challenge);
            guards.push(self.challenges.register(&challenge.token, key_authorization.as_str()));

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| classify("challenge-respond", &e))?;
        }

        self.wait_for_authorizations(&mut order).await?;
        drop(guards);

        // FinalizeOrder: fresh key pair and CSR for this certificate.
        let key_pair = rcgen::KeyPair::generate().map_err(|e| {
            AcmeError::new(AcmeErrorKind::Protocol, "finalize", e.to_string())
        })?;
        let mut params = rcgen::CertificateParams::new(vec![hostname.to_string()])
            .map_err(|e| AcmeError::new(AcmeErrorKind::Protocol, "finalize", e.to_string()))?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::new(AcmeErrorKind::Protocol, "finalize", e.to_string()))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| classify("finalize", &e))?;

        // CertificateDownload
        let cert_pem = self.wait_for_certificate(&mut order).await?;
        let (not_before, not_after) = parse_validity(&cert_pem)?;

        tracing::info!(
            hostname = %hostname,
            not_after = %not_after,
            "certificate issued"
        );

        Ok(IssuedCert {
            cert_pem,
            key_pem: key_pair.serialize_pem(),
            not_before,
            not_after,
        })
    }
}

/// Pick the HTTP-01 challenge out of an authorization.
fn http01_challenge(authz: &Authorization) -> Result<&instant_acme::Challenge, AcmeError> {
    authz
        .challenges
        .iter()
        .find(|c| c.r#type == ChallengeType::Http01)
        .ok_or_else(|| {
            AcmeError::new(
                AcmeErrorKind::Protocol,
                "challenge-fetch",
                "server offered no http-01 challenge",
            )
        })
}

/// Map an `instant_acme` error onto the local taxonomy.
///
/// The library's error type does not expose retryability, so this leans on
/// the problem-document type for server rejections and treats transport
/// wording as retryable.
fn classify(stage: &'static str, err: &instant_acme::Error) -> AcmeError {
    let detail = err.to_string();
    let kind = if detail.contains("rateLimited")
        || detail.contains("rate limit")
        || detail.contains("unauthorized")
        || detail.contains("rejectedIdentifier")
    {
        AcmeErrorKind::RejectedByServer
    } else if detail.contains("API error") || detail.contains("urn:ietf:params:acme:error") {
        AcmeErrorKind::RejectedByServer
    } else if detail.contains("connection")
        || detail.contains("timed out")
        || detail.contains("error sending request")
        || detail.contains("dns error")
        || detail.contains("channel closed")
    {
        AcmeErrorKind::Network
    } else {
        AcmeErrorKind::Protocol
    };
    AcmeError::new(kind, stage, detail)
}

/// Extract the validity window from the leaf of a PEM chain.
fn parse_validity(cert_pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), AcmeError> {
    let leaf = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .next()
        .transpose()
        .map_err(|e| AcmeError::new(AcmeErrorKind::Protocol, "certificate-parse", e.to_string()))?
        .ok_or_else(|| {
            AcmeError::new(
                AcmeErrorKind::Protocol,
                "certificate-parse",
                "downloaded chain contains no certificate",
            )
        })?;

    let (_, cert) = x509_parser::parse_x509_certificate(&leaf).map_err(|e| {
        AcmeError::new(AcmeErrorKind::Protocol, "certificate-parse", e.to_string())
    })?;

    let not_before = DateTime::<Utc>::from_timestamp(cert.validity().not_before.timestamp(), 0);
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0);
    match (not_before, not_after) {
        (Some(nb), Some(na)) => Ok((nb, na)),
        _ => Err(AcmeError::new(
            AcmeErrorKind::Protocol,
            "certificate-parse",
            "certificate validity out of range",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_extracted_from_leaf() {
        let mut params = rcgen::CertificateParams::new(vec!["example.test".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2024, 1, 1);
        params.not_after = rcgen::date_time_ymd(2034, 1, 1);
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let (not_before, not_after) = parse_validity(&cert.pem()).unwrap();
        assert_eq!(not_before, "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(not_after, "2034-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn garbage_pem_is_a_protocol_error() {
        let err = parse_validity("not a certificate").unwrap_err();
        assert_eq!(err.kind, AcmeErrorKind::Protocol);
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(AcmeError::new(AcmeErrorKind::Network, "t", "x").is_retryable());
        assert!(AcmeError::new(AcmeErrorKind::ChallengeTimeout, "t", "x").is_retryable());
        assert!(!AcmeError::new(AcmeErrorKind::RejectedByServer, "t", "x").is_retryable());
        assert!(!AcmeError::new(AcmeErrorKind::Protocol, "t", "x").is_retryable());
    }
}
