//! Local SDP exchange.
//!
//! Two transport variants exist in the field. Older firmware accepts a plain
//! JSON POST on port 8081; newer firmware runs an encrypted handshake on
//! port 9991 where the request path itself is derived from the server's
//! public-key blob. The legacy variant is tried first, the handshake on any
//! failure.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::crypto;
use crate::error::{DriverError, Result};

pub const LEGACY_PORT: u16 = 8081;
pub const HANDSHAKE_PORT: u16 = 9991;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Letters the path-suffix digits are encoded with.
const SUFFIX_ALPHABET: [char; 10] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J'];

/// Exchange the SDP offer with a device on the local network.
///
/// Returns the raw answer body (a JSON document with `sdp` and `type`).
pub async fn exchange_sdp_local(http: &reqwest::Client, ip: &str, offer: &str) -> Result<String> {
    match legacy_exchange(http, ip, offer).await {
        Ok(answer) => {
            info!("SDP exchanged via legacy endpoint");
            return Ok(answer);
        }
        Err(e) => {
            warn!(error = %e, "legacy signaling failed, trying handshake endpoint");
        }
    }
    match handshake_exchange(http, ip, offer).await {
        Ok(answer) => {
            info!("SDP exchanged via handshake endpoint");
            Ok(answer)
        }
        Err(e) => {
            warn!(error = %e, "handshake signaling failed");
            Err(DriverError::LocalSignaling)
        }
    }
}

/// Plain JSON POST to `:8081/offer`; the body comes back verbatim.
async fn legacy_exchange(http: &reqwest::Client, ip: &str, offer: &str) -> Result<String> {
    let url = format!("http://{ip}:{LEGACY_PORT}/offer");
    let response = http
        .post(&url)
        .header("Content-Type", "application/json")
        .body(offer.to_string())
        .timeout(EXCHANGE_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.text().await?)
}

/// Encrypted handshake on `:9991`.
///
/// `con_notify` returns a base64 JSON blob whose `data1` embeds the server's
/// RSA key between 10-character pads; the trailing pad also encodes the path
/// suffix for the follow-up `con_ing_<suffix>` request.
async fn handshake_exchange(http: &reqwest::Client, ip: &str, offer: &str) -> Result<String> {
    let notify_url = format!("http://{ip}:{HANDSHAKE_PORT}/con_notify");
    let body = http
        .post(&notify_url)
        .timeout(EXCHANGE_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let decoded = BASE64
        .decode(body.trim())
        .map_err(|e| DriverError::Protocol(format!("con_notify body is not base64: {e}")))?;
    let notify: Value = serde_json::from_slice(&decoded)?;
    let data1 = notify
        .get("data1")
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::Protocol("con_notify response without data1".to_string()))?;
    if data1.len() <= 20 {
        return Err(DriverError::Protocol("data1 too short".to_string()));
    }

    let public_key_pem = &data1[10..data1.len() - 10];
    let suffix = path_suffix(data1);
    debug!(suffix = %suffix, "derived connection path");

    let public_key = crypto::rsa_load_public_key(public_key_pem)?;
    let aes_key = crypto::generate_aes_key();
    let payload = json!({
        "data1": crypto::aes_encrypt(offer, &aes_key)?,
        "data2": crypto::rsa_encrypt(&aes_key, &public_key)?,
    });

    let connect_url = format!("http://{ip}:{HANDSHAKE_PORT}/con_ing_{suffix}");
    // The firmware expects the JSON document as a raw form-encoded body.
    let answer = http
        .post(&connect_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(serde_json::to_string(&payload)?)
        .timeout(EXCHANGE_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    crypto::aes_decrypt(answer.trim(), &aes_key)
}

/// Derive the request-path suffix from the last 10 characters of `data1`:
/// split into 2-character groups, map each group's second character to its
/// index in `A..J`, concatenate the indices as decimal digits.
fn path_suffix(data1: &str) -> String {
    let tail: Vec<char> = data1.chars().rev().take(10).collect();
    let tail: Vec<char> = tail.into_iter().rev().collect();
    let mut suffix = String::new();
    for group in tail.chunks(2) {
        let [_, second] = group else { continue };
        match SUFFIX_ALPHABET.iter().position(|c| c == second) {
            Some(index) => suffix.push_str(&index.to_string()),
            None => warn!(character = %second, "character outside the suffix alphabet"),
        }
    }
    suffix
}
