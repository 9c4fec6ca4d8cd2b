//! Google OAuth2 token plumbing shared by the connect flow and the scan
//! worker's refresh path.

use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::server_config::GoogleConfig;

#[derive(Debug, derive_more::Display)]
pub enum TokenError {
    /// The user revoked access or the refresh token aged out. The owning
    /// integration must be reconnected.
    #[display("Token expired or revoked")]
    ExpiredOrRevoked,
    #[display("Token endpoint rejected the request: {_0}")]
    Rejected(String),
    #[display("Token request failed: {_0}")]
    Transport(reqwest::Error),
}

impl std::error::Error for TokenError {}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
}

/// Exchanges an authorization code for a token pair.
pub async fn exchange_code(
    http_client: &HttpClient,
    google: &GoogleConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, TokenError> {
    let params = [
        ("client_id", google.client_id.as_str()),
        ("client_secret", google.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri),
    ];

    let resp = http_client
        .post(&google.token_uri)
        .form(&params)
        .send()
        .await
        .map_err(TokenError::Transport)?;

    if resp.status().is_success() {
        resp.json().await.map_err(TokenError::Transport)
    } else {
        Err(error_from_body(resp).await)
    }
}

/// Trades a refresh token for a fresh access token.
pub async fn exchange_refresh_token(
    http_client: &HttpClient,
    google: &GoogleConfig,
    refresh_token: &str,
) -> Result<RefreshResponse, TokenError> {
    let params = [
        ("client_id", google.client_id.as_str()),
        ("client_secret", google.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];

    let resp = http_client
        .post(&google.token_uri)
        .form(&params)
        .send()
        .await
        .map_err(TokenError::Transport)?;

    if resp.status().is_success() {
        resp.json().await.map_err(TokenError::Transport)
    } else {
        Err(error_from_body(resp).await)
    }
}

pub async fn fetch_userinfo(
    http_client: &HttpClient,
    google: &GoogleConfig,
    access_token: &str,
) -> Result<UserInfo, TokenError> {
    let resp = http_client
        .get(&google.userinfo_uri)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(TokenError::Transport)?;

    if resp.status().is_success() {
        resp.json().await.map_err(TokenError::Transport)
    } else {
        Err(error_from_body(resp).await)
    }
}

async fn error_from_body(resp: reqwest::Response) -> TokenError {
    let status = resp.status();
    let body: TokenErrorBody = resp.json().await.unwrap_or_default();

    if body.error == "invalid_grant"
        || body
            .error_description
            .contains("Token has been expired or revoked")
    {
        TokenError::ExpiredOrRevoked
    } else {
        TokenError::Rejected(format!("{status}: {} {}", body.error, body.error_description))
    }
}
