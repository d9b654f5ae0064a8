use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Duration, Local};
use color_eyre::{Result, eyre::eyre};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: i32,
    pub email: String,
    pub name: String,
    pub expires_at: DateTime<Local>,
}

/// Stateless signed session tokens: `base64(json).base64(hmac)`.
#[derive(Clone)]
pub struct SessionService {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService").finish_non_exhaustive()
    }
}

impl SessionService {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    pub fn create(&self, user_id: i32, email: &str, name: &str) -> Result<String> {
        self.create_at(user_id, email, name, Local::now())
    }

    fn create_at(
        &self,
        user_id: i32,
        email: &str,
        name: &str,
        now: DateTime<Local>,
    ) -> Result<String> {
        let data = SessionData {
            user_id,
            email: email.to_owned(),
            name: name.to_owned(),
            expires_at: now + Duration::days(SESSION_DAYS),
        };
        let encoded = URL_SAFE.encode(serde_json::to_vec(&data)?);
        let signature = URL_SAFE.encode(self.mac(&encoded)?.finalize().into_bytes());
        Ok(format!("{encoded}.{signature}"))
    }

    pub fn validate(&self, token: &str) -> Result<SessionData> {
        self.validate_at(token, Local::now())
    }

    fn validate_at(&self, token: &str, now: DateTime<Local>) -> Result<SessionData> {
        let (encoded, signature) = token
            .split_once('.')
            .filter(|(_, sig)| !sig.contains('.'))
            .ok_or_else(|| eyre!("invalid session format"))?;

        let signature = URL_SAFE
            .decode(signature)
            .map_err(|_| eyre!("invalid session signature"))?;
        self.mac(encoded)?
            .verify_slice(&signature)
            .map_err(|_| eyre!("invalid session signature"))?;

        let json = URL_SAFE
            .decode(encoded)
            .map_err(|e| eyre!("failed to decode session: {e}"))?;
        let data: SessionData =
            serde_json::from_slice(&json).map_err(|e| eyre!("failed to unmarshal session: {e}"))?;

        if now >= data.expires_at {
            return Err(eyre!("session expired"));
        }
        Ok(data)
    }

    fn mac(&self, data: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| eyre!("{e}"))?;
        mac.update(data.as_bytes());
        Ok(mac)
    }
}

pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::days(SESSION_DAYS))
        .build()
}

/// Path must match the cookie being removed.
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}
