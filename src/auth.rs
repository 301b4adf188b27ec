//! Exchanges an API key + unique client id for a short-lived bearer token
//! via an HTTPS POST to a REST endpoint. Retry policy lives entirely in the
//! `Supervisor`; this module makes exactly one attempt per call.

use std::time::Duration;

use serde::Deserialize;

use crate::error::AuthError;

/// Default authentication endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://api.pointonenav.com/api/v1/auth/token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Performs the blocking HTTPS auth exchange: a form-encoded POST carrying
/// `api_key`/`unique_id`, parsing an `access_token` field out of the JSON
/// response.
pub struct Authenticator {
    url: String,
    client: reqwest::blocking::Client,
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_URL.to_string())
    }
}

impl Authenticator {
    pub fn new(url: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest::blocking::Client::builder() with only a timeout never fails");

        Self { url, client }
    }

    /// `POST`s `api_key`/`unique_id` as a form body and parses the JSON
    /// `access_token` field out of the response. Never retries.
    pub fn authenticate(&self, api_key: &str, unique_id: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("api_key", api_key), ("unique_id", unique_id)])
            .send()?;

        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AuthError::Forbidden(status.as_u16()));
        }

        if !status.is_success() {
            return Err(AuthError::UnexpectedStatus(status.as_u16()));
        }

        let body: TokenResponse = response.json()?;
        body.access_token.ok_or(AuthError::MissingToken)
    }
}
