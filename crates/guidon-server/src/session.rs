//! Web session verification against the auth collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use guidon_shared::types::{Caller, Permissions, UserId};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The collaborator answered and said no.
    #[error("Invalid or expired session")]
    Invalid,

    #[error("Auth service unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, session_id: &str) -> Result<Caller, SessionError>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    session_id: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(default)]
    user: Option<SessionUser>,
}

#[derive(Deserialize)]
struct SessionUser {
    id: String,
    username: String,
    #[serde(default)]
    avatar: Option<String>,
}

/// `POST {base}/auth/verify {session_id}` -> `{valid, user}`.
pub struct HttpSessionVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionVerifier {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SessionVerifier for HttpSessionVerifier {
    async fn verify(&self, session_id: &str) -> Result<Caller, SessionError> {
        let resp = self
            .client
            .post(format!("{}/auth/verify", self.base_url))
            .json(&VerifyRequest { session_id })
            .send()
            .await
            .map_err(|e| SessionError::Unreachable(e.to_string()))?;

        if resp.status().is_client_error() {
            return Err(SessionError::Invalid);
        }
        if !resp.status().is_success() {
            return Err(SessionError::Unreachable(format!(
                "auth service returned {}",
                resp.status()
            )));
        }

        let body: VerifyResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::Unreachable(e.to_string()))?;

        match body {
            VerifyResponse {
                valid: true,
                user: Some(user),
            } => Ok(Caller {
                id: UserId(user.id),
                username: user.username,
                avatar: user.avatar,
                // Web sessions never carry guild permissions.
                permissions: Permissions::default(),
            }),
            _ => Err(SessionError::Invalid),
        }
    }
}
