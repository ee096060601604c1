//! HMAC-SHA256 signing for Standard Webhooks compliance.
//!
//! The signature covers `{msg_id}.{timestamp}.{payload}` and is sent as
//! `webhook-signature: v1,{base64 hmac}` next to the `webhook-id` and `webhook-timestamp`
//! headers, so receivers can use any Standard Webhooks library to verify deliveries.
//!
//! See: <https://www.standardwebhooks.com/>

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use hmac::{Hmac, Mac};
use rand::prelude::RngExt;
use rand::rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix for webhook secrets
pub const SECRET_PREFIX: &str = "whsec_";

/// Signature scheme version emitted in `webhook-signature`.
const SIGNATURE_VERSION: &str = "v1";

/// Generate a `whsec_` prefixed base64-encoded 32-byte secret.
pub fn generate_secret() -> String {
    let mut secret_bytes = [0u8; 32];
    rng().fill(&mut secret_bytes);
    format!("{SECRET_PREFIX}{}", BASE64_STANDARD.encode(secret_bytes))
}

/// Raw key bytes of a `whsec_` secret, `None` for a missing prefix or bad base64.
pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let encoded = secret.strip_prefix(SECRET_PREFIX)?;
    BASE64_STANDARD.decode(encoded).ok()
}

fn mac_for(msg_id: &str, timestamp: i64, payload: &str, secret: &str) -> Option<HmacSha256> {
    let key = decode_secret(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key).ok()?;
    mac.update(format!("{msg_id}.{timestamp}.{payload}").as_bytes());
    Some(mac)
}

/// Sign a payload, returning the `webhook-signature` header value.
pub fn sign_payload(msg_id: &str, timestamp: i64, payload: &str, secret: &str) -> Option<String> {
    let signature = mac_for(msg_id, timestamp, payload, secret)?.finalize().into_bytes();
    Some(format!("{SIGNATURE_VERSION},{}", BASE64_STANDARD.encode(signature)))
}

/// Check a `webhook-signature` header value. The comparison is constant time.
pub fn verify_signature(msg_id: &str, timestamp: i64, payload: &str, signature: &str, secret: &str) -> bool {
    let Some(encoded) = signature.strip_prefix(SIGNATURE_VERSION).and_then(|s| s.strip_prefix(',')) else {
        return false;
    };
    let Ok(expected) = BASE64_STANDARD.decode(encoded) else {
        return false;
    };
    mac_for(msg_id, timestamp, payload, secret).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}
