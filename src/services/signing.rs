use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

const SECRET_PREFIX: &str = "whsec_";
const SECRET_BYTE_LENGTH: usize = 32;

/// Generate a fresh endpoint secret: 256 random bits, URL-safe base64,
/// with a `whsec_` prefix.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTE_LENGTH];
    rand::thread_rng().fill(&mut bytes);
    format!("{}{}", SECRET_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
///
/// Deterministic: no timestamp or nonce enters the MAC.
pub fn sign(payload: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Value for the `X-Webhook-Signature` header.
pub fn signature_header(payload: &[u8], secret: &str) -> String {
    format!("{}{}", SIGNATURE_PREFIX, sign(payload, secret))
}

/// Extract the hex digest from a `sha256=<hex>` header value.
pub fn parse_signature_header(value: &str) -> Option<&str> {
    value
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .filter(|hex| !hex.is_empty())
}

/// Receiver-side check of a signature header against the raw body.
/// Comparison is constant-time.
pub fn verify_signature(payload: &[u8], secret: &str, header_value: &str) -> bool {
    let Some(digest_hex) = parse_signature_header(header_value) else {
        return false;
    };
    let Ok(digest) = hex::decode(digest_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length");
    mac.update(payload);
    mac.verify_slice(&digest).is_ok()
}
