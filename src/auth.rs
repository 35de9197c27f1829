//! Admin session auth — HMAC-signed cookie.
//!
//! The cookie value is `value.hexmac` where the MAC is HMAC-SHA256 over the
//! value with the server secret. Verification is constant-time via the MAC
//! itself.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the admin session.
pub const COOKIE_NAME: &str = "responder_admin";

const SESSION_VALUE: &str = "admin";
const SESSION_MAX_AGE_SECS: u64 = 60 * 60 * 12;

/// Admin auth settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// Plain admin password; login is disabled when unset.
    pub admin_password: Option<SecretString>,
    secret: SecretString,
}

impl AuthConfig {
    pub fn new(admin_password: Option<SecretString>, secret: Option<SecretString>) -> Self {
        // Without an explicit secret, derive a stable one from the password
        // so sessions survive restarts; last resort is a dev-only constant.
        let secret = secret.unwrap_or_else(|| match &admin_password {
            Some(password) => {
                let digest = Sha256::digest(password.expose_secret().as_bytes());
                SecretString::from(hex::encode(digest))
            }
            None => SecretString::from("dev-secret"),
        });
        Self {
            admin_password,
            secret,
        }
    }

    pub fn from_env() -> Self {
        let password = std::env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty());
        let secret = std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());
        Self::new(password.map(SecretString::from), secret.map(SecretString::from))
    }

    fn mac(&self, value: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(value.as_bytes());
        mac
    }

    /// Sign a value into a `value.hexmac` token.
    pub fn sign(&self, value: &str) -> String {
        let tag = self.mac(value).finalize().into_bytes();
        format!("{value}.{}", hex::encode(tag))
    }

    /// Recover the value from a signed token, or `None` if the tag is bad.
    pub fn unsign(&self, signed: &str) -> Option<String> {
        let (value, tag_hex) = signed.rsplit_once('.')?;
        let tag = hex::decode(tag_hex).ok()?;
        self.mac(value).verify_slice(&tag).ok()?;
        Some(value.to_string())
    }

    /// Check a submitted password. Always false when no password is set.
    pub fn check_password(&self, password: &str) -> bool {
        match &self.admin_password {
            Some(expected) => {
                let expected = Sha256::digest(expected.expose_secret().as_bytes());
                let given = Sha256::digest(password.as_bytes());
                // Compare digests so length differences leak nothing
                expected == given
            }
            None => false,
        }
    }

    /// `Set-Cookie` value establishing an admin session.
    pub fn session_cookie(&self) -> String {
        format!(
            "{COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_MAX_AGE_SECS}",
            self.sign(SESSION_VALUE)
        )
    }

    /// `Set-Cookie` value clearing the session.
    pub fn clear_cookie(&self) -> String {
        format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }

    /// Does the `Cookie` header carry a valid admin session?
    pub fn is_authed(&self, cookie_header: Option<&str>) -> bool {
        let Some(header) = cookie_header else {
            return false;
        };
        let Some(token) = cookie_value(header, COOKIE_NAME) else {
            return false;
        };
        self.unsign(&token).as_deref() == Some(SESSION_VALUE)
    }
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().to_string())
    })
}
