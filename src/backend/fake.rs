//! Scripted in-memory backend used by the tests

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    AuthSession, AuthUser, Backend, BackendError, LinkProof, MagicLinkRequest, StoredObject,
    Upload,
};

/// A call recorded by [`FakeBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    MagicLink(MagicLinkRequest),
    Verify(LinkProof),
    SignOut(String),
    Insert {
        table: String,
        records: Vec<Value>,
        token: Option<String>,
    },
    Upload {
        bucket: String,
        path: String,
        content_type: String,
        size: usize,
        upsert: bool,
    },
}

/// Backend that succeeds (assigning sequential ids) unless told to fail
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    failure: Mutex<Option<BackendError>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose every call fails with `message`
    pub fn failing(message: &str) -> Self {
        let backend = Self::default();
        *backend.failure.lock().unwrap() = Some(BackendError::Api {
            status: 400,
            message: message.to_string(),
        });
        backend
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn send_magic_link(&self, request: &MagicLinkRequest) -> Result<(), BackendError> {
        self.record(Call::MagicLink(request.clone()))
    }

    async fn verify_link(&self, proof: &LinkProof) -> Result<AuthSession, BackendError> {
        self.record(Call::Verify(proof.clone()))?;
        Ok(AuthSession {
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expires_in: 3600,
            user: AuthUser {
                id: "user-1".to_string(),
                email: Some("ana@unibave.net".to_string()),
            },
        })
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        self.record(Call::SignOut(token.to_string()))
    }

    async fn insert(
        &self,
        table: &str,
        records: Vec<Value>,
        token: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        self.record(Call::Insert {
            table: table.to_string(),
            records: records.clone(),
            token: token.map(str::to_string),
        })?;

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(i, mut record)| {
                if let Value::Object(fields) = &mut record {
                    fields.insert("id".to_string(), json!(i + 1));
                }
                record
            })
            .collect())
    }

    async fn upload(
        &self,
        upload: Upload,
        _token: Option<&str>,
    ) -> Result<StoredObject, BackendError> {
        self.record(Call::Upload {
            bucket: upload.bucket.clone(),
            path: upload.path.clone(),
            content_type: upload.content_type.clone(),
            size: upload.bytes.len(),
            upsert: upload.upsert,
        })?;

        Ok(StoredObject {
            full_path: format!("{}/{}", upload.bucket, upload.path),
            path: upload.path,
        })
    }
}
