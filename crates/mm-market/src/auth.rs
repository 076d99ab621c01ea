//! CLOB authentication.
//!
//! L1: an EIP-712 `ClobAuth` attestation signed by the trading key, used
//! once to derive (or create) the API credential triple.
//! L2: HMAC-SHA256 over `timestamp + method + path + body` with the derived
//! secret, attached to every authenticated REST call.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use tracing::info;

use crate::clob::ClobError;

const CLOB_AUTH_DOMAIN: &str = "ClobAuthDomain";
const DOMAIN_VERSION: &str = "1";
const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";
const POLYGON_CHAIN_ID: u64 = 137;

/// API credential triple for L2 request signing.
#[derive(Debug, Clone)]
pub struct ApiCreds {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Derive API credentials from the signing key.
///
/// Tries `POST /auth/api-key` first (first run), falling back to
/// `GET /auth/derive-api-key` for keys that already have credentials.
pub async fn derive_api_creds(
    http: &Client,
    base_url: &str,
    signer: &PrivateKeySigner,
) -> Result<ApiCreds, ClobError> {
    let address = signer.address();
    let timestamp = Utc::now().timestamp();
    let nonce: u64 = rand::random();
    let signature = l1_signature(signer, timestamp, nonce)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    insert_header(&mut headers, "POLY_ADDRESS", &format!("{address:#x}"))?;
    insert_header(&mut headers, "POLY_SIGNATURE", &signature)?;
    insert_header(&mut headers, "POLY_TIMESTAMP", &timestamp.to_string())?;
    insert_header(&mut headers, "POLY_NONCE", &nonce.to_string())?;

    let create = http
        .post(format!("{base_url}/auth/api-key"))
        .headers(headers.clone())
        .body("{}")
        .send()
        .await?;

    let raw: Value = if create.status().is_success() {
        create.json().await?
    } else {
        let derive = http
            .get(format!("{base_url}/auth/derive-api-key"))
            .headers(headers)
            .send()
            .await?;
        if !derive.status().is_success() {
            return Err(ClobError::Auth(format!(
                "credential derivation failed: create {}, derive {}",
                create.status(),
                derive.status()
            )));
        }
        derive.json().await?
    };

    let data = raw.get("data").unwrap_or(&raw);
    let key = pick(data, &["apiKey", "api_key", "key", "id"])
        .ok_or_else(|| ClobError::Auth("missing api key in auth response".into()))?;
    let secret = pick(data, &["secret", "apiSecret", "api_secret"])
        .ok_or_else(|| ClobError::Auth("missing api secret in auth response".into()))?;
    let passphrase = pick(data, &["passphrase", "apiPassphrase", "api_passphrase"])
        .ok_or_else(|| ClobError::Auth("missing api passphrase in auth response".into()))?;

    info!(address = %address, "derived CLOB API credentials");
    Ok(ApiCreds {
        key,
        secret,
        passphrase,
    })
}

fn pick(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// EIP-712 signature over the ClobAuth attestation.
///
/// The struct contains a field literally named `address`, which the `sol!`
/// macro cannot express, so the hash is assembled by hand the same way the
/// exchange contracts do it.
pub fn l1_signature(
    signer: &PrivateKeySigner,
    timestamp: i64,
    nonce: u64,
) -> Result<String, ClobError> {
    let domain_separator = clob_auth_domain_separator();

    let struct_type_hash = keccak256(
        b"ClobAuth(address address,string timestamp,uint256 nonce,string message)",
    );
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(struct_type_hash.as_slice());
    encoded.extend_from_slice(&address_word(signer.address()));
    encoded.extend_from_slice(keccak256(timestamp.to_string().as_bytes()).as_slice());
    encoded.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
    encoded.extend_from_slice(keccak256(CLOB_AUTH_MESSAGE.as_bytes()).as_slice());
    let struct_hash = keccak256(&encoded);

    let digest = eip712_digest(domain_separator, struct_hash);
    let signature = signer
        .sign_hash_sync(&digest)
        .map_err(|e| ClobError::Auth(format!("L1 signing failed: {e}")))?;

    Ok(format!("0x{}", hex::encode(signature.as_bytes())))
}

/// HMAC-SHA256 L2 signature over one request.
pub fn l2_signature(
    api_secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: Option<&str>,
) -> Result<String, ClobError> {
    let secret = URL_SAFE_NO_PAD
        .decode(api_secret)
        .or_else(|_| URL_SAFE.decode(api_secret))
        .map_err(|_| ClobError::Auth("api secret is not url-safe base64".into()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&secret)
        .map_err(|e| ClobError::Auth(format!("HMAC init failed: {e}")))?;
    mac.update(
        format!(
            "{}{}{}{}",
            timestamp,
            method.to_uppercase(),
            request_path,
            body.unwrap_or("")
        )
        .as_bytes(),
    );
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Authenticated-request headers for one L2 call.
pub fn l2_headers(
    creds: &ApiCreds,
    address: Address,
    method: &str,
    request_path: &str,
    body: Option<&str>,
) -> Result<HeaderMap, ClobError> {
    let timestamp = Utc::now().timestamp();
    let signature = l2_signature(&creds.secret, timestamp, method, request_path, body)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    insert_header(&mut headers, "POLY_ADDRESS", &format!("{address:#x}"))?;
    insert_header(&mut headers, "POLY_SIGNATURE", &signature)?;
    insert_header(&mut headers, "POLY_TIMESTAMP", &timestamp.to_string())?;
    insert_header(&mut headers, "POLY_API_KEY", &creds.key)?;
    insert_header(&mut headers, "POLY_PASSPHRASE", &creds.passphrase)?;
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), ClobError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| ClobError::Auth(format!("invalid {name} header value")))?;
    headers.insert(name, value);
    Ok(())
}

fn clob_auth_domain_separator() -> B256 {
    let type_hash = keccak256(b"EIP712Domain(string name,string version,uint256 chainId)");
    let mut encoded = Vec::with_capacity(4 * 32);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(keccak256(CLOB_AUTH_DOMAIN.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(DOMAIN_VERSION.as_bytes()).as_slice());
    encoded.extend_from_slice(&U256::from(POLYGON_CHAIN_ID).to_be_bytes::<32>());
    keccak256(&encoded)
}

fn eip712_digest(domain_separator: B256, struct_hash: B256) -> B256 {
    let mut buf = [0u8; 66];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(domain_separator.as_slice());
    buf[34..66].copy_from_slice(struct_hash.as_slice());
    keccak256(buf)
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945387dc9f5a59e86cdc84e64546a1d8f76d59";

    #[test]
    fn test_l1_signature_shape() {
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        let sig = l1_signature(&signer, 1_754_049_600, 42).unwrap();
        assert!(sig.starts_with("0x"));
        // 65 bytes hex-encoded.
        assert_eq!(sig.len(), 2 + 130);
    }

    #[test]
    fn test_l1_signature_deterministic() {
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        let a = l1_signature(&signer, 1_754_049_600, 42).unwrap();
        let b = l1_signature(&signer, 1_754_049_600, 42).unwrap();
        assert_eq!(a, b);
        let c = l1_signature(&signer, 1_754_049_601, 42).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_l2_signature_matches_known_payload() {
        // Secret "secret" in url-safe base64.
        let secret = URL_SAFE.encode(b"secret");
        let sig = l2_signature(&secret, 1_754_049_600, "get", "/data/orders", None).unwrap();
        // Deterministic for a fixed payload.
        let again = l2_signature(&secret, 1_754_049_600, "GET", "/data/orders", None).unwrap();
        assert_eq!(sig, again);
        // Body participates in the payload.
        let with_body =
            l2_signature(&secret, 1_754_049_600, "GET", "/data/orders", Some("{}")).unwrap();
        assert_ne!(sig, with_body);
    }

    #[test]
    fn test_l2_rejects_bad_secret() {
        assert!(l2_signature("not base64!!", 0, "GET", "/", None).is_err());
    }
}
