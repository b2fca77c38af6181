//! Request-signing schemes for the supported exchanges.
//!
//! Three distinct schemes that must not be mixed up:
//! - Binance: HMAC-SHA256 over the canonical query string, hex-encoded.
//! - Coinbase: HMAC-SHA256 over `timestamp + METHOD + path + body`,
//!   base64-encoded.
//! - Kraken: HMAC-SHA512 keyed with the base64-decoded secret over
//!   `path + SHA256(nonce + body)`, base64-encoded.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Binance signature: hex HMAC-SHA256 of the sorted query string.
pub fn binance_sign(query_string: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Auth(format!("invalid Binance secret: {}", e)))?;
    mac.update(query_string.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Coinbase signature: base64 HMAC-SHA256 of `timestamp + METHOD + path + body`.
pub fn coinbase_sign(
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
    secret: &str,
) -> Result<String> {
    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), request_path, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Auth(format!("invalid Coinbase secret: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Kraken signature: base64 HMAC-SHA512 over `path + SHA256(nonce + body)`,
/// keyed with the base64-decoded secret.
pub fn kraken_sign(path: &str, nonce: &str, body: &str, secret_b64: &str) -> Result<String> {
    let secret = BASE64_STANDARD
        .decode(secret_b64)
        .map_err(|e| GatewayError::Auth(format!("invalid Kraken secret encoding: {}", e)))?;

    let mut inner = Sha256::new();
    inner.update(nonce.as_bytes());
    inner.update(body.as_bytes());
    let digest = inner.finalize();

    let mut mac = HmacSha512::new_from_slice(&secret)
        .map_err(|e| GatewayError::Auth(format!("invalid Kraken secret: {}", e)))?;
    mac.update(path.as_bytes());
    mac.update(&digest);
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}
