//! Remote backend client
//!
//! Every screen of the application is a thin call into a hosted
//! backend-as-a-service: passwordless authentication, table inserts and
//! object storage. The [`Backend`] trait is the seam between the web layer and
//! that service; [`SupabaseClient`] speaks its REST API over HTTP.

mod supabase;

#[cfg(test)]
pub(crate) mod fake;

pub use supabase::SupabaseClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure of a backend request
///
/// Both variants carry a human-readable message that is shown to the user
/// verbatim; no distinction is made between transient and permanent failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The request never produced a response (DNS, TLS, timeout, ...)
    #[error("{0}")]
    Transport(String),

    /// The backend answered with a non-success status
    #[error("{message}")]
    Api { status: u16, message: String },
}

impl BackendError {
    /// The text surfaced to the user
    pub fn message(&self) -> &str {
        match self {
            BackendError::Transport(message) => message,
            BackendError::Api { message, .. } => message,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Authenticated user as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session issued by the backend after a magic link is followed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    pub user: AuthUser,
}

fn default_expires_in() -> u64 {
    3600
}

/// How the emailed link proves the visitor's identity
#[derive(Debug, Clone, PartialEq)]
pub enum LinkProof {
    /// PKCE flow: one-time code plus the verifier kept in the visitor's browser
    Code { code: String, verifier: String },

    /// Token-hash flow: hashed token and its type (`magiclink`, `email`, ...)
    TokenHash { token_hash: String, kind: String },
}

/// Magic-link request
#[derive(Debug, Clone, PartialEq)]
pub struct MagicLinkRequest {
    pub email: String,
    /// Where the emailed link should land
    pub redirect_to: Option<String>,
    /// PKCE challenge (plain method)
    pub code_challenge: Option<String>,
}

/// An object written to storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Path of the object inside its bucket
    pub path: String,
    /// Full key, `bucket/path`
    pub full_path: String,
}

/// Object storage upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Overwrite an existing object with the same path
    pub upsert: bool,
}

/// Operations the application needs from the hosted backend
///
/// `token` is the signed-in user's access token; `None` issues the request
/// with the public key only.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ask the backend to email a one-time sign-in link
    async fn send_magic_link(&self, request: &MagicLinkRequest) -> Result<(), BackendError>;

    /// Turn the proof carried by a followed link into a session
    async fn verify_link(&self, proof: &LinkProof) -> Result<AuthSession, BackendError>;

    /// Revoke the session behind an access token
    async fn sign_out(&self, token: &str) -> Result<(), BackendError>;

    /// Insert records into a table and return the stored representation
    async fn insert(
        &self,
        table: &str,
        records: Vec<Value>,
        token: Option<&str>,
    ) -> Result<Vec<Value>, BackendError>;

    /// Upload a blob to object storage
    async fn upload(&self, upload: Upload, token: Option<&str>)
    -> Result<StoredObject, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_is_verbatim() {
        let err = BackendError::Api {
            status: 409,
            message: "duplicate key value violates unique constraint".to_string(),
        };
        assert_eq!(err.message(), "duplicate key value violates unique constraint");
        assert_eq!(err.to_string(), err.message());

        let err = BackendError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_session_defaults() {
        let session: AuthSession = serde_json::from_value(serde_json::json!({
            "access_token": "jwt",
            "user": {"id": "u-1", "email": "ana@unibave.net"}
        }))
        .unwrap();
        assert_eq!(session.expires_in, 3600);
        assert_eq!(session.refresh_token, None);
        assert_eq!(session.user.email.as_deref(), Some("ana@unibave.net"));
    }
}
