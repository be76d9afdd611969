//! Cookie sessions, password hashing and password reset tokens.

use crate::error::{HostError, HostResult};
use base64::prelude::*;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use monsti_cbor::Hash;
use monsti_types::User;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const SESSION_COOKIE: &str = "monsti-session";

type HmacSha256 = Hmac<Sha256>;

/// Values kept in the signed session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

fn mac(key: &str) -> HostResult<HmacSha256> {
    if key.is_empty() {
        return Err(HostError::Auth("no session key configured".into()));
    }
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| HostError::Auth(e.to_string()))
}

impl CookieSession {
    /// Cookie value: base64url payload, `.`, hex HMAC of the payload.
    pub fn encode(&self, key: &str) -> HostResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| HostError::Auth(e.to_string()))?;
        let payload = BASE64_URL_SAFE_NO_PAD.encode(json);
        let mut mac = mac(key)?;
        mac.update(payload.as_bytes());
        Ok(format!("{payload}.{}", hex::encode(mac.finalize().into_bytes())))
    }

    /// Verify and decode a cookie value; anything invalid is `None`.
    pub fn decode(value: &str, key: &str) -> Option<Self> {
        let (payload, signature) = value.rsplit_once('.')?;
        let signature = hex::decode(signature).ok()?;
        let mut mac = mac(key).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;
        let json = BASE64_URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// `Set-Cookie` header value.
    pub fn set_cookie(&self, key: &str) -> HostResult<String> {
        Ok(format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
            self.encode(key)?
        ))
    }
}

/// Pull the session cookie out of a `Cookie` header.
pub fn session_cookie(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then_some(value)
    })
}

/// Password hashing collaborator.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> HostResult<String>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct BcryptHasher {
    pub cost: u32,
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> HostResult<String> {
        bcrypt::hash(password, self.cost).map_err(|e| HostError::Auth(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }
}

fn token_hash(site: &str, login: &str, unix: i64, secret: &str) -> String {
    let unix = unix.to_string();
    BASE32_NOPAD.encode(Hash::of_parts(&[site, login, unix.as_str(), secret]).as_bytes())
}

/// Password reset token for `login`, valid until the password changes.
pub fn password_token(site: &str, login: &str, unix: i64, secret: &str) -> HostResult<String> {
    if secret.is_empty() {
        return Err(HostError::Auth("no password token key configured".into()));
    }
    Ok(format!("{login}-{unix}-{}", token_hash(site, login, unix, secret)))
}

/// Check a reset token and return the user it was issued for.
///
/// Tokens issued before the user's last password change are rejected.
pub fn verify_password_token(
    token: &str,
    site: &str,
    secret: &str,
    get_user: impl FnOnce(&str) -> HostResult<Option<User>>,
) -> HostResult<Option<User>> {
    if secret.is_empty() {
        return Err(HostError::Auth("no password token key configured".into()));
    }
    let mut parts = token.rsplitn(3, '-');
    let (Some(hash), Some(unix), Some(login)) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(None);
    };
    let Ok(unix) = unix.parse::<i64>() else {
        return Ok(None);
    };
    if token_hash(site, login, unix, secret) != hash {
        return Ok(None);
    }
    let Some(user) = get_user(login)? else {
        return Ok(None);
    };
    if unix < user.password_changed.timestamp() {
        return Ok(None);
    }
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn cookies_reject_tampering() {
        let session = CookieSession {
            login: Some("admin".into()),
        };
        let value = session.encode("key").expect("encode");
        assert_eq!(CookieSession::decode(&value, "key"), Some(session.clone()));
        assert_eq!(CookieSession::decode(&value, "other"), None);

        let forged = CookieSession {
            login: Some("root".into()),
        }
        .encode("other")
        .expect("encode");
        let (payload, _) = forged.split_once('.').expect("dot");
        let (_, signature) = value.split_once('.').expect("dot");
        assert_eq!(CookieSession::decode(&format!("{payload}.{signature}"), "key"), None);
        assert!(session.encode("").is_err());

        let header = format!("a=b; {SESSION_COOKIE}={value}; c=d");
        assert_eq!(session_cookie(&header), Some(value.as_str()));
    }

    #[test]
    fn tokens_expire_with_password_changes() {
        let user_at = |changed: i64| User {
            login: "my-user".into(),
            name: String::new(),
            email: String::new(),
            password: String::new(),
            password_changed: Utc.timestamp_opt(changed, 0).single().expect("time"),
        };
        let t1 = 1_000;
        let token = password_token("site", "my-user", t1, "secret").expect("token");
        assert!(token.starts_with("my-user-1000-"));

        let verify = |token: &str, changed: i64| {
            verify_password_token(token, "site", "secret", |login| {
                assert_eq!(login, "my-user");
                Ok(Some(user_at(changed)))
            })
            .expect("verify")
        };
        assert!(verify(&token, 0).is_some());
        // password changed at T2 > T1
        assert!(verify(&token, 2_000).is_none());
        let t3 = password_token("site", "my-user", 3_000, "secret").expect("token");
        assert!(verify(&t3, 2_000).is_some());

        assert!(verify(&format!("{token}x"), 0).is_none());
        assert!(verify_password_token(&token, "other-site", "secret", |_| Ok(Some(user_at(0))))
            .expect("verify")
            .is_none());
        assert!(password_token("site", "my-user", t1, "").is_err());
    }

    #[test]
    fn bcrypt_hashes_verify() {
        let hasher = BcryptHasher { cost: 4 };
        let hash = hasher.hash("secret").expect("hash");
        assert!(hasher.verify("secret", &hash));
        assert!(!hasher.verify("wrong", &hash));
        assert!(!hasher.verify("secret", "not a hash"));
    }
}
