//! Configuration screen: logo upload to public object storage

use axum::{
    Extension,
    extract::{Multipart, State},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use log::{info, warn};

use crate::app::SharedState;
use crate::backend::{Backend, BackendError, StoredObject, Upload};
use crate::error::AppError;
use crate::login::CurrentUser;
use crate::views::{self, ConfigPage, Notice, Shell};

pub const LOGO_UPLOADED_MESSAGE: &str = "Logo enviada com sucesso.";

/// Upload a logo image, overwriting any object with the same name
pub struct UploadLogo {
    pub bucket: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadLogo {
    /// Object name for a logo uploaded at `millis` (Unix epoch milliseconds)
    pub fn object_name(millis: i64) -> String {
        format!("logo-{}", millis)
    }

    pub async fn execute(
        self,
        backend: &dyn Backend,
        token: Option<&str>,
    ) -> Result<StoredObject, BackendError> {
        let upload = Upload {
            bucket: self.bucket,
            path: Self::object_name(Utc::now().timestamp_millis()),
            content_type: self.content_type,
            bytes: self.bytes,
            upsert: true,
        };
        backend.upload(upload, token).await
    }
}

fn render_config(
    state: &SharedState,
    user: &CurrentUser,
    logo_url: Option<String>,
    notice: Option<Notice>,
) -> Result<Response, AppError> {
    let page = ConfigPage {
        shell: Shell {
            active: "config",
            user_email: user.user.display_name(),
        },
        bucket: state.config.logo_bucket.clone(),
        logo_url,
        notice,
    };
    Ok(state.views.render(views::CONFIG, &page)?.into_response())
}

// Web handlers

pub async fn serve_config(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    render_config(&state, &user, None, None)
}

pub async fn handle_logo_upload(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut logo = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("logo") {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await?;
            if !bytes.is_empty() {
                logo = Some((content_type, bytes.to_vec()));
            }
        }
    }

    // No file selected: nothing to upload
    let Some((content_type, bytes)) = logo else {
        return render_config(&state, &user, None, None);
    };

    let command = UploadLogo {
        bucket: state.config.logo_bucket.clone(),
        content_type,
        bytes,
    };
    match command.execute(state.backend.as_ref(), user.token()).await {
        Ok(stored) => {
            info!("logo uploaded to {}", stored.full_path);
            let url = state
                .config
                .public_object_url(&state.config.logo_bucket, &stored.path);
            render_config(
                &state,
                &user,
                Some(url),
                Some(Notice::success(LOGO_UPLOADED_MESSAGE)),
            )
        }
        Err(err) => {
            warn!("logo upload failed: {}", err);
            render_config(&state, &user, None, Some(Notice::error(err.message())))
        }
    }
}
