//! SHA-256 confirmation tokens and HMAC webhook signatures.
//!
//! The confirmation token format is shared with dealers and with existing
//! confirmation records, so its input order and timestamp layout must not
//! change.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::types::Timestamp;

/// Timestamp layout used inside confirmation tokens (`yyyy-MM-ddTHH:mm:ss`).
pub const TOKEN_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

type HmacSha256 = Hmac<Sha256>;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Format a timestamp the way confirmation tokens expect it.
///
/// Sub-second precision and the UTC offset are dropped.
pub fn format_token_timestamp(at: &Timestamp) -> String {
    at.format(TOKEN_TIMESTAMP_FORMAT).to_string()
}

/// Build the confirmation token for one dealer acknowledgment.
///
/// Lowercase hex SHA-256 over `id_carga ∥ dealer_bac ∥ proceso ∥ timestamp ∥
/// registros`, concatenated without separators.
pub fn generate_token_confirmacion(
    id_carga: &str,
    dealer_bac: &str,
    proceso: &str,
    fecha_sincronizacion: &Timestamp,
    registros_sincronizados: i32,
) -> String {
    let input = format!(
        "{id_carga}{dealer_bac}{proceso}{}{registros_sincronizados}",
        format_token_timestamp(fecha_sincronizacion)
    );
    sha256_hex(input.as_bytes())
}

/// Compute an HMAC-SHA256 signature for a webhook payload.
///
/// The `secret` is the dealer's shared secret key. Returns the hex-encoded
/// signature of `payload`.
pub fn compute_webhook_hmac(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    let result = mac.finalize().into_bytes();
    result.iter().map(|b| format!("{b:02x}")).collect()
}
