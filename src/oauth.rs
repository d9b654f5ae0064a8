use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use color_eyre::{Result, eyre::eyre};
use serde::Deserialize;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const SCOPES: &str =
    "https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/userinfo.profile";

pub const STATE_COOKIE: &str = "oauth_state";
pub const STATE_MAX_AGE: i64 = 600;

#[derive(Debug, Clone)]
pub struct GoogleAuth {
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GoogleUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub picture: String,
    pub verified_email: bool,
}

impl GoogleAuth {
    pub fn new(client_id: &str, client_secret: &str, redirect_url: &str) -> Self {
        Self {
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            redirect_url: redirect_url.to_owned(),
        }
    }

    pub fn auth_url(&self, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("state", state),
                ("access_type", "offline"),
            ],
        )?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let resp = reqwest::Client::new()
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| eyre!("call token endpoint failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(eyre!("token exchange failed: {}", resp.status()));
        }
        resp.json::<TokenResponse>()
            .await
            .map(|token| token.access_token)
            .map_err(|e| eyre!("decode token response failed: {e}"))
    }

    pub async fn user_info(&self, access_token: &str) -> Result<GoogleUser> {
        let resp = reqwest::Client::new()
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| eyre!("call userinfo failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(eyre!("failed to get user info: {}", resp.status()));
        }
        resp.json::<GoogleUser>()
            .await
            .map_err(|e| eyre!("decode userinfo response failed: {e}"))
    }
}

/// Random CSRF state for the consent round trip.
pub fn generate_state() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_url_carries_client_and_state() {
        let auth = GoogleAuth::new("cid", "secret", "http://localhost:8080/auth/callback");
        let url = reqwest::Url::parse(&auth.auth_url("xyz").unwrap()).unwrap();
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(params.contains(&("client_id".to_owned(), "cid".to_owned())));
        assert!(params.contains(&("state".to_owned(), "xyz".to_owned())));
        assert!(params.contains(&(
            "redirect_uri".to_owned(),
            "http://localhost:8080/auth/callback".to_owned()
        )));
        assert!(!url.as_str().contains("secret"));
    }

    #[test]
    fn states_are_unique() {
        let a = generate_state();
        assert_eq!(a.len(), 44);
        assert_ne!(a, generate_state());
    }
}
