//! Authenticated encryption of OAuth2 login state and session credentials.
//!
//! # Purpose
//! Lets the gateway hand state to the browser instead of storing it: tokens
//! are AES-256-GCM sealed JSON, base64url encoded without padding.
//!
//! # Key invariants
//! - The key is HKDF-SHA256 over the provider client secret with no salt, so
//!   any process configured with the same secret can open tokens sealed by
//!   another (including itself across restarts).
//! - Every seal draws a fresh random 96-bit nonce; the token is
//!   `base64url(nonce || ciphertext || tag)`.
//! - `open` either returns a fully decoded value or an error. Expiry is checked
//!   after decryption, so an authentic but stale login state is still rejected.
//!
//! # Security model
//! Anyone holding the client secret can decrypt historical tokens. Login state
//! lives for minutes and only carries the PKCE verifier and the caller's own
//! query string.
use crate::oauth2::state::LoginState;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"warden oauth2 state v1";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to derive state key")]
    KeyDerivation,
    #[error("failed to encrypt state")]
    Encrypt,
    #[error("state token is not valid base64url")]
    Encoding,
    #[error("state token is too short")]
    TooShort,
    #[error("state token failed authentication")]
    Decrypt,
    #[error("state payload is invalid: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("login state expired")]
    Expired,
}

pub struct StateCodec {
    cipher: Aes256Gcm,
}

impl StateCodec {
    pub fn new(client_secret: &str) -> Result<Self, CodecError> {
        let hkdf = Hkdf::<Sha256>::new(None, client_secret.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(KEY_INFO, &mut key)
            .map_err(|_| CodecError::KeyDerivation)?;
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, CodecError> {
        let plaintext = serde_json::to_vec(value).map_err(CodecError::Payload)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| CodecError::Encrypt)?;
        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    pub fn open<T: DeserializeOwned>(&self, token: &str) -> Result<T, CodecError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CodecError::Encoding)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CodecError::TooShort);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Decrypt)?;
        serde_json::from_slice(&plaintext).map_err(CodecError::Payload)
    }

    pub fn encode_login(&self, state: &LoginState) -> Result<String, CodecError> {
        self.seal(state)
    }

    pub fn decode_login(&self, token: &str) -> Result<LoginState, CodecError> {
        self.decode_login_at(token, chrono::Utc::now().timestamp())
    }

    pub fn decode_login_at(&self, token: &str, now: i64) -> Result<LoginState, CodecError> {
        let state: LoginState = self.open(token)?;
        if state.is_expired_at(now) {
            return Err(CodecError::Expired);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth2::state::SessionAuthStorage;

    fn login(expires_at: i64) -> LoginState {
        LoginState {
            pkce_verifier: "verifier".to_string(),
            csrf_token: "csrf".to_string(),
            original_query: "originalPath=%2Fns%2Fpayments&tab=events".to_string(),
            expires_at,
        }
    }

    fn future() -> i64 {
        chrono::Utc::now().timestamp() + 300
    }

    #[test]
    fn round_trips_login_state() {
        let codec = StateCodec::new("s3cret").expect("codec");
        let state = login(future());
        let token = codec.encode_login(&state).expect("encode");
        assert_eq!(codec.decode_login(&token).expect("decode"), state);
    }

    #[test]
    fn same_secret_opens_across_instances() {
        let token = StateCodec::new("s3cret")
            .expect("codec")
            .encode_login(&login(future()))
            .expect("encode");
        let restarted = StateCodec::new("s3cret").expect("codec");
        assert!(restarted.decode_login(&token).is_ok());
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let codec = StateCodec::new("s3cret").expect("codec");
        let state = login(future());
        let a = codec.encode_login(&state).expect("encode");
        let b = codec.encode_login(&state).expect("encode");
        assert_ne!(a, b);
        let raw_a = URL_SAFE_NO_PAD.decode(&a).expect("b64");
        let raw_b = URL_SAFE_NO_PAD.decode(&b).expect("b64");
        assert_ne!(raw_a[..NONCE_LEN], raw_b[..NONCE_LEN]);
    }

    #[test]
    fn any_flipped_byte_is_rejected() {
        let codec = StateCodec::new("s3cret").expect("codec");
        let token = codec.encode_login(&login(future())).expect("encode");
        let raw = URL_SAFE_NO_PAD.decode(&token).expect("b64");
        for index in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x01;
            let tampered = URL_SAFE_NO_PAD.encode(tampered);
            assert!(
                matches!(codec.decode_login(&tampered), Err(CodecError::Decrypt)),
                "byte {index} accepted"
            );
        }
    }

    #[test]
    fn any_edited_character_is_rejected() {
        let codec = StateCodec::new("s3cret").expect("codec");
        let token = codec.encode_login(&login(future())).expect("encode");
        for index in 0..token.len() {
            let mut chars: Vec<char> = token.chars().collect();
            chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
            let edited: String = chars.into_iter().collect();
            assert!(codec.decode_login(&edited).is_err(), "char {index} accepted");
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = StateCodec::new("s3cret")
            .expect("codec")
            .encode_login(&login(future()))
            .expect("encode");
        let other = StateCodec::new("other").expect("codec");
        assert!(matches!(
            other.decode_login(&token),
            Err(CodecError::Decrypt)
        ));
    }

    #[test]
    fn expired_state_is_rejected_after_decryption() {
        let codec = StateCodec::new("s3cret").expect("codec");
        let now = chrono::Utc::now().timestamp();
        let token = codec.encode_login(&login(now - 1)).expect("encode");
        assert!(matches!(codec.decode_login(&token), Err(CodecError::Expired)));
        assert!(codec.decode_login_at(&token, now - 10).is_ok());
        assert!(matches!(
            codec.decode_login_at(&token, now - 1),
            Err(CodecError::Expired)
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let codec = StateCodec::new("s3cret").expect("codec");
        assert!(matches!(
            codec.decode_login("not base64!"),
            Err(CodecError::Encoding)
        ));
        assert!(matches!(
            codec.decode_login(&URL_SAFE_NO_PAD.encode([0u8; 20])),
            Err(CodecError::TooShort)
        ));
        assert!(matches!(codec.decode_login(""), Err(CodecError::TooShort)));
    }

    #[test]
    fn wrong_payload_type_is_rejected() {
        let codec = StateCodec::new("s3cret").expect("codec");
        let token = codec
            .seal(&SessionAuthStorage {
                access_token: "a".to_string(),
                refresh_token: None,
            })
            .expect("seal");
        assert!(matches!(
            codec.decode_login(&token),
            Err(CodecError::Payload(_))
        ));
    }
}
