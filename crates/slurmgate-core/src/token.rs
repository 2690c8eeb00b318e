//! HMAC bearer tokens for slurmgate.
//!
//! A token binds a username to an expiry time.
//! Format: `hex([8-byte expiry][username]) "." hex(HMAC-SHA256)`

use crate::error::{GateError, GateResult};
use ring::hmac;

/// Seconds since the unix epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Create a token for `username` that expires `ttl_secs` from now.
pub fn create_token(secret: &[u8], username: &str, ttl_secs: u64) -> String {
    create_token_with_expiry(secret, username, now_secs().saturating_add(ttl_secs))
}

/// Create a token with an absolute expiry (unix seconds).
pub fn create_token_with_expiry(secret: &[u8], username: &str, expiry: u64) -> String {
    let mut payload = Vec::with_capacity(8 + username.len());
    payload.extend_from_slice(&expiry.to_be_bytes());
    payload.extend_from_slice(username.as_bytes());

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &payload);

    format!("{}.{}", hex::encode(&payload), hex::encode(tag.as_ref()))
}

/// Verify a token and return the username it was issued to.
///
/// The signature is checked before the expiry so that a forged token never
/// reveals whether it would have been expired.
pub fn verify_token(secret: &[u8], token: &str) -> GateResult<String> {
    let (payload_hex, tag_hex) = token
        .split_once('.')
        .ok_or_else(|| GateError::Token("malformed token".into()))?;

    let payload = hex::decode(payload_hex)
        .map_err(|_| GateError::Token("malformed token payload".into()))?;
    let tag =
        hex::decode(tag_hex).map_err(|_| GateError::Token("malformed token signature".into()))?;

    if payload.len() <= 8 {
        return Err(GateError::Token(format!(
            "invalid token payload length: {}",
            payload.len()
        )));
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &payload, &tag)
        .map_err(|_| GateError::Token("invalid token signature".into()))?;

    let (expiry_bytes, username_bytes) = payload.split_at(8);
    let mut expiry = [0u8; 8];
    expiry.copy_from_slice(expiry_bytes);
    if now_secs() > u64::from_be_bytes(expiry) {
        return Err(GateError::Token("token expired".into()));
    }

    String::from_utf8(username_bytes.to_vec())
        .map_err(|_| GateError::Token("token username is not UTF-8".into()))
}

/// Generate a random server secret (32 bytes).
pub fn generate_secret() -> GateResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| GateError::Other("system RNG failure".into()))?;
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_verify() {
        let secret = generate_secret().unwrap();
        let token = create_token(&secret, "alice", 3600);
        assert_eq!(verify_token(&secret, &token).unwrap(), "alice");
    }

    #[test]
    fn username_with_separator() {
        let secret = generate_secret().unwrap();
        let token = create_token(&secret, "a.b.c", 3600);
        assert_eq!(verify_token(&secret, &token).unwrap(), "a.b.c");
    }

    #[test]
    fn wrong_secret() {
        let secret1 = generate_secret().unwrap();
        let secret2 = generate_secret().unwrap();
        let token = create_token(&secret1, "alice", 3600);
        assert!(verify_token(&secret2, &token).is_err());
    }

    #[test]
    fn tampered_username() {
        let secret = generate_secret().unwrap();
        let token = create_token(&secret, "alice", 3600);
        let (_, tag) = token.split_once('.').unwrap();

        let mut forged = Vec::new();
        forged.extend_from_slice(&(now_secs() + 3600).to_be_bytes());
        forged.extend_from_slice(b"root");
        let forged = format!("{}.{}", hex::encode(forged), tag);

        assert!(matches!(
            verify_token(&secret, &forged),
            Err(GateError::Token(_))
        ));
    }

    #[test]
    fn expired_token() {
        let secret = generate_secret().unwrap();
        let token = create_token_with_expiry(&secret, "alice", now_secs() - 10);
        let err = verify_token(&secret, &token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn malformed_tokens() {
        let secret = generate_secret().unwrap();
        assert!(verify_token(&secret, "").is_err());
        assert!(verify_token(&secret, "no-separator").is_err());
        assert!(verify_token(&secret, "zz.zz").is_err());
        // Payload without a username.
        let short = format!("{}.{}", hex::encode([0u8; 8]), hex::encode([0u8; 32]));
        assert!(verify_token(&secret, &short).is_err());
    }
}
