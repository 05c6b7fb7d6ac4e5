//! Signed webhook delivery with retry.
//!
//! [`WebhookClient`] POSTs a JSON [`WebhookPayload`] to a dealer URL, signed
//! with HMAC-SHA256 over the exact body bytes. Transport failures and non-2xx
//! responses are retried after each configured delay; a 2xx response whose
//! body is not a valid acknowledgment is final.

use std::time::Duration;

use dealersync_core::hashing::compute_webhook_hmac;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Header carrying `sha256=<hex hmac of body>`.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    /// The dealer answered 2xx but the body is not a positive acknowledgment.
    #[error("Invalid acknowledgment: {0}")]
    InvalidAck(String),

    /// The acknowledgment carried a token different from the one sent.
    #[error("Acknowledged token does not match the computed token")]
    TokenMismatch,

    /// Delivery stopped because the run was cancelled.
    #[error("Delivery cancelled")]
    Cancelled,
}

impl WebhookError {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::HttpStatus(_))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body POSTed to a dealer webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub proceso: String,
    pub id_carga: String,
    pub evento_carga_proceso_id: i64,
    pub dealer_bac: String,
    /// `yyyy-MM-ddTHH:mm:ss`, the same layout hashed into the token.
    pub fecha_sincronizacion: String,
    pub registros_sincronizados: i32,
    pub token_confirmacion: String,
}

/// Body a dealer returns to acknowledge a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    #[serde(default)]
    pub token_confirmacion: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of delivering one payload, including how many requests were sent.
#[derive(Debug)]
pub struct DeliveryReport {
    pub attempts: i32,
    pub outcome: Result<WebhookAck, WebhookError>,
}

// ---------------------------------------------------------------------------
// WebhookClient
// ---------------------------------------------------------------------------

/// Delivers signed payloads to dealer webhook endpoints.
#[derive(Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    retry_delays: Vec<Duration>,
    verify_ack_token: bool,
}

impl WebhookClient {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(
        timeout: Duration,
        retry_delays: Vec<Duration>,
        verify_ack_token: bool,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            retry_delays,
            verify_ack_token,
        })
    }

    /// Deliver `payload` to `url`, retrying retryable failures.
    ///
    /// Never returns early with an error: the outcome of the last attempt
    /// and the number of requests sent are reported together. Cancellation
    /// is observed between attempts, never mid-request.
    pub async fn deliver(
        &self,
        url: &str,
        secret: &str,
        payload: &WebhookPayload,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryReport {
                    attempts: 0,
                    outcome: Err(WebhookError::InvalidAck(format!(
                        "payload serialization failed: {e}"
                    ))),
                }
            }
        };
        let signature = format!("sha256={}", compute_webhook_hmac(secret, &body));

        let mut attempts = 0;
        let mut delays = self.retry_delays.iter();
        loop {
            attempts += 1;
            let result = self
                .try_send(url, &body, &signature, &payload.token_confirmacion)
                .await;

            let err = match result {
                Ok(ack) => {
                    return DeliveryReport {
                        attempts,
                        outcome: Ok(ack),
                    }
                }
                Err(e) => e,
            };

            let next_delay = if err.is_retryable() { delays.next() } else { None };
            let Some(delay) = next_delay else {
                tracing::error!(
                    url,
                    dealer_bac = %payload.dealer_bac,
                    attempts,
                    error = %err,
                    "Webhook delivery failed"
                );
                return DeliveryReport {
                    attempts,
                    outcome: Err(err),
                };
            };

            tracing::warn!(
                attempt = attempts,
                url,
                dealer_bac = %payload.dealer_bac,
                error = %err,
                "Webhook delivery attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return DeliveryReport {
                        attempts,
                        outcome: Err(WebhookError::Cancelled),
                    };
                }
                _ = tokio::time::sleep(*delay) => {}
            }
        }
    }

    /// Execute a single POST and validate the acknowledgment.
    async fn try_send(
        &self,
        url: &str,
        body: &str,
        signature: &str,
        expected_token: &str,
    ) -> Result<WebhookAck, WebhookError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_owned())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        let ack: WebhookAck = serde_json::from_slice(&bytes)
            .map_err(|e| WebhookError::InvalidAck(format!("unreadable body: {e}")))?;
        self.check_ack(ack, expected_token)
    }

    fn check_ack(&self, ack: WebhookAck, expected_token: &str) -> Result<WebhookAck, WebhookError> {
        if !ack.success {
            let reason = ack
                .message
                .clone()
                .unwrap_or_else(|| "dealer reported failure".to_string());
            return Err(WebhookError::InvalidAck(reason));
        }
        if self.verify_ack_token {
            if let Some(token) = &ack.token_confirmacion {
                if !token.eq_ignore_ascii_case(expected_token) {
                    return Err(WebhookError::TokenMismatch);
                }
            }
        }
        Ok(ack)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn client(verify: bool) -> WebhookClient {
        WebhookClient::new(Duration::from_secs(1), Vec::new(), verify).unwrap()
    }

    fn ack(success: bool, token: Option<&str>) -> WebhookAck {
        WebhookAck {
            success,
            token_confirmacion: token.map(str::to_string),
            message: None,
        }
    }

    #[test]
    fn payload_serializes_camel_case() {
        let payload = WebhookPayload {
            proceso: "ProductList".into(),
            id_carga: "CARGA1".into(),
            evento_carga_proceso_id: 7,
            dealer_bac: "BAC001".into(),
            fecha_sincronizacion: "2024-01-01T10:00:00".into(),
            registros_sincronizados: 150,
            token_confirmacion: "abc".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["idCarga"], "CARGA1");
        assert_eq!(json["eventoCargaProcesoId"], 7);
        assert_eq!(json["registrosSincronizados"], 150);
        assert_eq!(json["tokenConfirmacion"], "abc");
    }

    #[test]
    fn ack_without_token_parses() {
        let ack: WebhookAck = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(ack.success);
        assert!(ack.token_confirmacion.is_none());
    }

    #[test]
    fn negative_ack_is_invalid() {
        assert_matches!(
            client(true).check_ack(ack(false, None), "abc"),
            Err(WebhookError::InvalidAck(_))
        );
    }

    #[test]
    fn mismatched_token_is_rejected_only_when_verifying() {
        assert_matches!(
            client(true).check_ack(ack(true, Some("other")), "abc"),
            Err(WebhookError::TokenMismatch)
        );
        assert!(client(false).check_ack(ack(true, Some("other")), "abc").is_ok());
        assert!(client(true).check_ack(ack(true, Some("ABC")), "abc").is_ok());
    }

    #[test]
    fn only_transport_failures_are_retried() {
        assert!(WebhookError::HttpStatus(502).is_retryable());
        assert!(!WebhookError::TokenMismatch.is_retryable());
        assert!(!WebhookError::InvalidAck("x".into()).is_retryable());
        assert!(!WebhookError::Cancelled.is_retryable());
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[tokio::test]
    async fn unreachable_url_reports_every_attempt() {
        let client = WebhookClient::new(
            Duration::from_millis(500),
            vec![Duration::from_millis(1), Duration::from_millis(1)],
            true,
        )
        .unwrap();
        let payload = WebhookPayload {
            proceso: "ProductList".into(),
            id_carga: "CARGA1".into(),
            evento_carga_proceso_id: 1,
            dealer_bac: "BAC001".into(),
            fecha_sincronizacion: "2024-01-01T10:00:00".into(),
            registros_sincronizados: 1,
            token_confirmacion: "abc".into(),
        };
        let report = client
            .deliver("http://127.0.0.1:1/webhook", "secret", &payload, &CancellationToken::new())
            .await;
        assert_eq!(report.attempts, 3);
        assert_matches!(report.outcome, Err(WebhookError::Request(_)));
    }
}
