//! Firebase Cloud Messaging v1 sender. Mints a short-lived service-account
//! access token, then posts one message per device token.

use anyhow::{anyhow, Context};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};

const FIREBASE_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const ASSERTION_TTL_SECS: i64 = 3600;

/// The fields we need from a Google service account JSON key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// Exchanges a signed RS256 assertion for an FCM-scoped access token.
pub async fn fetch_access_token(
    http_client: &HttpClient,
    account: &ServiceAccount,
) -> AppResult<String> {
    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
        .context("service account private key is not valid RSA PEM")?;

    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &account.client_email,
        scope: FIREBASE_SCOPE,
        aud: &account.token_uri,
        iat: now,
        exp: now + ASSERTION_TTL_SECS,
    };
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .context("failed to sign service account assertion")?;

    let resp = http_client
        .post(&account.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Internal(anyhow!(
            "service account token exchange returned {status}: {body}"
        )));
    }

    let token: AccessTokenResponse = resp.json().await?;
    Ok(token.access_token)
}

/// Sends one notification to one device token. Delivery failures are
/// per-device; the caller decides whether to keep going.
pub async fn send_notification(
    http_client: &HttpClient,
    access_token: &str,
    project_id: &str,
    device_token: &str,
    title: &str,
    body: &str,
    data: &serde_json::Value,
) -> AppResult<()> {
    let url = format!("https://fcm.googleapis.com/v1/projects/{project_id}/messages:send");
    let payload = json!({
        "message": {
            "token": device_token,
            "notification": { "title": title, "body": body },
            "data": data,
            "android": { "priority": "high" },
            "apns": {
                "payload": { "aps": { "content-available": 1 } }
            }
        }
    });

    let resp = http_client
        .post(&url)
        .bearer_auth(access_token)
        .json(&payload)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(AppError::Internal(anyhow!(
            "fcm send returned {status}: {text}"
        )));
    }

    Ok(())
}
