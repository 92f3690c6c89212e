//! Signed user lifecycle webhooks from the identity provider.
//!
//! Deliveries follow the Svix scheme:
//!
//! - `svix-id`: unique message id
//! - `svix-timestamp`: unix seconds
//! - `svix-signature`: space-separated `v1,<base64 HMAC-SHA256>` entries
//!
//! The MAC covers `"{id}.{timestamp}.{body}"` and is keyed with the
//! base64-decoded part of the `whsec_...` secret. Timestamps more than five
//! minutes away from the local clock are rejected.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::{
    entitlement::UserId,
    error::{GateError, Result},
};

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";

/// Maximum clock difference accepted for `svix-timestamp`.
pub const TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// The three delivery headers.
#[derive(Debug, Clone, Copy)]
pub struct WebhookHeaders<'a> {
    /// `svix-id`.
    pub id: &'a str,
    /// `svix-timestamp`.
    pub timestamp: &'a str,
    /// `svix-signature`.
    pub signature: &'a str,
}

/// Verifies webhook signatures.
#[derive(Clone)]
pub struct WebhookVerifier {
    key: Vec<u8>,
    tolerance: Duration,
}

impl WebhookVerifier {
    /// Creates a verifier from a `whsec_...` secret.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the secret is not valid base64.
    pub fn new(secret: &str) -> Result<Self> {
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        let key = STANDARD
            .decode(encoded)
            .map_err(|e| GateError::Config(format!("webhook secret is not valid base64: {e}")))?;
        if key.is_empty() {
            return Err(GateError::Config("webhook secret is empty".into()));
        }
        Ok(Self { key, tolerance: TIMESTAMP_TOLERANCE })
    }

    /// Overrides the timestamp tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Computes the `v1,<sig>` value for a delivery.
    ///
    /// Used by senders and tests; verification does not call it.
    #[must_use]
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> String {
        let mac = self.mac(id, &timestamp.to_string(), body);
        format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> HmacSha256 {
        #[allow(clippy::expect_used, reason = "HMAC accepts keys of any length")]
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Verifies a delivery against the current time.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::WebhookRejected`] on a stale or malformed
    /// timestamp or when no signature matches.
    pub fn verify(&self, headers: WebhookHeaders<'_>, body: &[u8]) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GateError::WebhookRejected(format!("system time error: {e}")))?;
        self.verify_at(headers, body, now)
    }

    /// Verifies a delivery as if the current time were `now` (since the epoch).
    ///
    /// # Errors
    ///
    /// See [`WebhookVerifier::verify`].
    #[instrument(skip(self, headers, body), fields(svix_id = headers.id), level = "debug")]
    pub fn verify_at(&self, headers: WebhookHeaders<'_>, body: &[u8], now: Duration) -> Result<()> {
        let sent: u64 = headers
            .timestamp
            .trim()
            .parse()
            .map_err(|_| GateError::WebhookRejected("invalid svix-timestamp".into()))?;
        if Duration::from_secs(sent).abs_diff(now) > self.tolerance {
            return Err(GateError::WebhookRejected("timestamp outside tolerance".into()));
        }

        let matched = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.strip_prefix("v1,"))
            .filter_map(|sig| STANDARD.decode(sig).ok())
            .any(|sig| self.mac(headers.id, headers.timestamp, body).verify_slice(&sig).is_ok());

        if matched {
            debug!("webhook signature verified");
            Ok(())
        } else {
            Err(GateError::WebhookRejected("no matching signature".into()))
        }
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").field("tolerance", &self.tolerance).finish_non_exhaustive()
    }
}

/// A verified lifecycle event, reduced to what provisioning needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// A new account exists and needs an entitlement record.
    UserCreated {
        /// Account id.
        user_id: UserId,
        /// First listed email address, if any.
        email: Option<String>,
    },
    /// An account was deleted.
    UserDeleted {
        /// Account id.
        user_id: UserId,
    },
    /// Any other event type, or one without data. Acknowledged only.
    Ignored {
        /// The event's `type`.
        event_type: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<UserData>,
}

#[derive(Deserialize)]
struct UserData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
}

#[derive(Deserialize)]
struct EmailAddress {
    email_address: String,
}

impl ProvisioningEvent {
    /// Parses a verified payload.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidInput`] when the body is not an event
    /// envelope or a user event lacks the user id.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| GateError::InvalidInput(format!("invalid webhook payload: {e}")))?;

        let Some(data) = envelope.data else {
            return Ok(Self::Ignored { event_type: envelope.event_type });
        };

        match envelope.event_type.as_str() {
            "user.created" | "user.deleted" => {
                let user_id = data
                    .id
                    .filter(|id| !id.is_empty())
                    .map(UserId::new)
                    .ok_or_else(|| GateError::InvalidInput("user id missing in webhook payload".into()))?;
                if envelope.event_type == "user.created" {
                    let email = data.email_addresses.into_iter().next().map(|e| e.email_address);
                    Ok(Self::UserCreated { user_id, email })
                } else {
                    Ok(Self::UserDeleted { user_id })
                }
            }
            _ => Ok(Self::Ignored { event_type: envelope.event_type }),
        }
    }
}
