//! Generic authorization-code client for the upstream identity provider

use crate::config::snapshot::OAuthProviderSettings;
use log::{debug, error};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Provider response is missing {0}")]
    MissingField(&'static str),
}

/// Identity read from the userinfo endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub subject: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct ProviderTokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: Option<String>,
    email: Option<String>,
}

#[derive(Clone)]
pub struct OAuthProviderClient {
    http: Client,
    settings: Arc<OAuthProviderSettings>,
}

impl OAuthProviderClient {
    pub fn new(settings: OAuthProviderSettings) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(settings.client_timeout)
            .connect_timeout(settings.client_timeout)
            .build()?;
        Ok(Self {
            http,
            settings: Arc::new(settings),
        })
    }

    pub fn settings(&self) -> &OAuthProviderSettings {
        &self.settings
    }

    /// Provider authorize URL for a login started by this service
    pub fn authorization_url(&self, redirect_uri: &Url, state: &str, code_challenge: &str) -> Url {
        let mut url = self.settings.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.credentials.client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url
    }

    /// Exchange an authorization code and return the provider access token
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
        code_verifier: &str,
    ) -> Result<String, ProviderError> {
        let credentials = &self.settings.credentials;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];
        let response = self
            .http
            .post(self.settings.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let response = Self::check_status(response, "token exchange").await?;
        let body: ProviderTokenResponse = response.json().await?;
        debug!("Exchanged authorization code with provider");
        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or(ProviderError::MissingField("access_token"))
    }

    pub async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, ProviderError> {
        let response = self
            .http
            .get(self.settings.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::check_status(response, "userinfo").await?;
        let info: UserInfo = response.json().await?;
        Ok(ProviderIdentity {
            subject: info
                .sub
                .filter(|sub| !sub.is_empty())
                .ok_or(ProviderError::MissingField("sub"))?,
            email: info
                .email
                .filter(|email| !email.is_empty())
                .ok_or(ProviderError::MissingField("email"))?,
        })
    }

    async fn check_status(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Provider {} failed with status {}: {}", operation, status, body);
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
