use crate::oauth2::provider::TokenSet;
use serde::{Deserialize, Serialize};

/// Handshake context carried from `/oauth2/authorize` to `/oauth2/callback`.
///
/// Only ever leaves the process sealed by [`StateCodec`](crate::oauth2::codec::StateCodec).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub pkce_verifier: String,
    pub csrf_token: String,
    /// Raw query string of the authorize request, including `originalPath`.
    pub original_query: String,
    /// Unix seconds after which the state is rejected.
    pub expires_at: i64,
}

impl LoginState {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Credentials held by the browser after login, sealed into the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAuthStorage {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl From<TokenSet> for SessionAuthStorage {
    fn from(tokens: TokenSet) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}
