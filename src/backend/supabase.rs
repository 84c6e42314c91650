use async_trait::async_trait;
use log::debug;
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    AuthSession, Backend, BackendError, LinkProof, MagicLinkRequest, StoredObject, Upload,
};
use crate::config::Config;

/// Client for a Supabase-compatible REST API (GoTrue, PostgREST and Storage)
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: String,
}

impl SupabaseClient {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(SupabaseClient {
            http,
            base_url: config.backend_url.clone(),
            anon_key: config.anon_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        debug!("backend request: {} {}", method, path);
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

/// Extract the human-readable message from a backend error body
///
/// GoTrue answers with `msg` or `error_description`, PostgREST and Storage
/// with `message`, older endpoints with a bare `error` string.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Percent-encode each segment of an object path, keeping the separators
fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// Requests, built separately from sending them
impl SupabaseClient {
    fn magic_link_request(&self, request: &MagicLinkRequest) -> RequestBuilder {
        let mut body = json!({
            "email": request.email,
            "create_user": true,
        });
        if let Some(challenge) = &request.code_challenge {
            body["code_challenge"] = json!(challenge);
            body["code_challenge_method"] = json!("plain");
        }

        let mut builder = self.request(Method::POST, "/auth/v1/otp", None).json(&body);
        if let Some(redirect_to) = &request.redirect_to {
            builder = builder.query(&[("redirect_to", redirect_to)]);
        }
        builder
    }

    fn verify_request(&self, proof: &LinkProof) -> RequestBuilder {
        match proof {
            LinkProof::Code { code, verifier } => self
                .request(Method::POST, "/auth/v1/token", None)
                .query(&[("grant_type", "pkce")])
                .json(&json!({ "auth_code": code, "code_verifier": verifier })),
            LinkProof::TokenHash { token_hash, kind } => self
                .request(Method::POST, "/auth/v1/verify", None)
                .json(&json!({ "type": kind, "token_hash": token_hash })),
        }
    }

    fn sign_out_request(&self, token: &str) -> RequestBuilder {
        self.request(Method::POST, "/auth/v1/logout", Some(token))
    }

    fn insert_request(&self, table: &str, records: &[Value], token: Option<&str>) -> RequestBuilder {
        self.request(Method::POST, &format!("/rest/v1/{}", table), token)
            .header("Prefer", "return=representation")
            .json(records)
    }

    fn upload_request(&self, upload: Upload, token: Option<&str>) -> RequestBuilder {
        let path = format!(
            "/storage/v1/object/{}/{}",
            upload.bucket,
            encode_object_path(&upload.path)
        );
        self.request(Method::POST, &path, token)
            .header(header::CONTENT_TYPE, upload.content_type)
            .header(header::CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", if upload.upsert { "true" } else { "false" })
            .body(upload.bytes)
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn send_magic_link(&self, request: &MagicLinkRequest) -> Result<(), BackendError> {
        Self::send(self.magic_link_request(request)).await?;
        Ok(())
    }

    async fn verify_link(&self, proof: &LinkProof) -> Result<AuthSession, BackendError> {
        let response = Self::send(self.verify_request(proof)).await?;
        Ok(response.json::<AuthSession>().await?)
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        Self::send(self.sign_out_request(token)).await?;
        Ok(())
    }

    async fn insert(
        &self,
        table: &str,
        records: Vec<Value>,
        token: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        let response = Self::send(self.insert_request(table, &records, token)).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(rows)) => Ok(rows),
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(BackendError::Transport(format!(
                "invalid response from backend: {}",
                e
            ))),
        }
    }

    async fn upload(
        &self,
        upload: Upload,
        token: Option<&str>,
    ) -> Result<StoredObject, BackendError> {
        let path = upload.path.clone();
        let response = Self::send(self.upload_request(upload, token)).await?;
        let stored: UploadResponse = response.json().await?;

        Ok(StoredObject {
            path,
            full_path: stored.key,
        })
    }
}
