//! API key generation and hashing, plus the outbound HTTPS client.
//!
//! Raw API keys are returned to the caller exactly once. The store only keeps a SHA-256 digest for
//! lookup and a short preview for display.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};

/// Prefix carried by every API key.
pub const API_KEY_PREFIX: &str = "sk-";

/// Generates a cryptographically secure API key with 256 bits of entropy.
///
/// The key is formatted as `sk-{base64url_encoded_random_bytes}`, 46 characters in total.
pub fn generate_api_key() -> String {
    let mut key_bytes = [0u8; 32];
    rng().fill(&mut key_bytes);

    format!("{API_KEY_PREFIX}{}", general_purpose::URL_SAFE_NO_PAD.encode(key_bytes))
}

/// Outbound HTTP client with the given request timeout.
///
/// Installs the aws-lc-rs TLS provider first if no process default exists yet.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Losing a race with another installer is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Digest used to look a key up without storing it.
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Non-secret preview shown in listings, e.g. `sk-AbCdEf...wxyz`.
pub fn key_preview(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return format!("{}...", chars.iter().take(3).collect::<String>());
    }
    let head: String = chars.iter().take(9).collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
