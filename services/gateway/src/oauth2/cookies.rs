//! Cookies emitted by the OAuth2 flow.
//!
//! | name | contents | scope |
//! |---|---|---|
//! | `warden-oauth2-state` | sealed login state | `/oauth2`, five minutes, `HttpOnly` |
//! | `warden-session` | sealed session credentials | `/`, session, `HttpOnly` |
//! | `warden-auth-provider` | base64url JSON `{provider, authenticated}` | `/`, script-readable |
//! | `warden-auth-error` | base64url JSON `{code, message}` | `/`, script-readable |
//!
//! All cookies are `Secure` unless the gateway runs with insecure cookies
//! enabled for local development.
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

pub const STATE_COOKIE: &str = "warden-oauth2-state";
pub const SESSION_COOKIE: &str = "warden-session";
pub const PROVIDER_COOKIE: &str = "warden-auth-provider";
pub const ERROR_COOKIE: &str = "warden-auth-error";

pub const STATE_COOKIE_PATH: &str = "/oauth2";
pub const STATE_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIndicator {
    pub provider: String,
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorIndicator {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieSettings {
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self { secure: true }
    }
}

impl CookieSettings {
    pub fn insecure() -> Self {
        Self { secure: false }
    }

    fn build(
        &self,
        name: &'static str,
        value: String,
        path: &'static str,
        http_only: bool,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .path(path)
            .http_only(http_only)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build()
    }

    fn removal(&self, name: &'static str, path: &'static str) -> Cookie<'static> {
        let mut cookie = self.build(name, String::new(), path, true);
        cookie.make_removal();
        cookie
    }

    pub fn state(&self, token: String) -> Cookie<'static> {
        let mut cookie = self.build(STATE_COOKIE, token, STATE_COOKIE_PATH, true);
        cookie.set_max_age(time::Duration::seconds(STATE_TTL_SECS));
        cookie
    }

    pub fn clear_state(&self) -> Cookie<'static> {
        self.removal(STATE_COOKIE, STATE_COOKIE_PATH)
    }

    pub fn session(&self, token: String) -> Cookie<'static> {
        self.build(SESSION_COOKIE, token, "/", true)
    }

    pub fn clear_session(&self) -> Cookie<'static> {
        self.removal(SESSION_COOKIE, "/")
    }

    pub fn provider(&self, provider: &str, authenticated: bool) -> Cookie<'static> {
        let value = encode_json(&ProviderIndicator {
            provider: provider.to_string(),
            authenticated,
        });
        self.build(PROVIDER_COOKIE, value, "/", false)
    }

    pub fn error(&self, code: &str, message: &str) -> Cookie<'static> {
        let value = encode_json(&ErrorIndicator {
            code: code.to_string(),
            message: message.to_string(),
        });
        let mut cookie = self.build(ERROR_COOKIE, value, "/", false);
        cookie.set_max_age(time::Duration::seconds(STATE_TTL_SECS));
        cookie
    }

    pub fn clear_error(&self) -> Cookie<'static> {
        self.removal(ERROR_COOKIE, "/")
    }
}

fn encode_json<T: Serialize>(value: &T) -> String {
    // Serializing these plain structs cannot fail.
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap_or_default())
}

/// Decode an indicator cookie value. Used by tests and tooling.
pub fn decode_indicator<T: for<'de> Deserialize<'de>>(value: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cookie_is_scoped_and_short_lived() {
        let cookie = CookieSettings::default().state("token".to_string());
        assert_eq!(cookie.name(), STATE_COOKIE);
        assert_eq!(cookie.path(), Some("/oauth2"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(5)));
    }

    #[test]
    fn insecure_settings_drop_secure_flag() {
        let cookie = CookieSettings::insecure().session("token".to_string());
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[test]
    fn indicator_is_readable_json() {
        let cookie = CookieSettings::default().provider("oidc", true);
        assert_eq!(cookie.http_only(), Some(false));
        let decoded: ProviderIndicator = decode_indicator(cookie.value()).expect("decode");
        assert_eq!(
            decoded,
            ProviderIndicator {
                provider: "oidc".to_string(),
                authenticated: true
            }
        );
    }

    #[test]
    fn removal_cookie_expires_immediately() {
        let cookie = CookieSettings::default().clear_state();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.path(), Some("/oauth2"));
    }

    #[test]
    fn error_cookie_carries_code_and_message() {
        let cookie = CookieSettings::default().error("login_expired", "login state expired");
        let decoded: ErrorIndicator = decode_indicator(cookie.value()).expect("decode");
        assert_eq!(decoded.code, "login_expired");
        assert_eq!(decoded.message, "login state expired");
    }
}
