//! Outbound webhook delivery to dealer endpoints.

pub mod webhook;

pub use webhook::{
    DeliveryReport, WebhookAck, WebhookClient, WebhookError, WebhookPayload, SIGNATURE_HEADER,
};
