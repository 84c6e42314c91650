//! Spreadsheet import
//!
//! An uploaded file is decoded into an [`ImportBatch`], previewed (first
//! [`PREVIEW_LIMIT`] rows) and checked for the required columns. Validation
//! is advisory: confirming the import submits every decoded row, errors or
//! not, as one bulk insert of `{payload: row}` records.

use std::fmt;

use axum::{
    Extension,
    extract::{Multipart, State},
    response::{IntoResponse, Response},
};
use log::{info, warn};
use serde_json::{Value, json};

use crate::app::SharedState;
use crate::backend::{Backend, BackendError};
use crate::error::AppError;
use crate::loader::{self, ImportError, Row};
use crate::login::CurrentUser;
use crate::views::{self, ImportPage, Notice, Shell};

/// Columns every row must fill
pub const REQUIRED_COLUMNS: [&str; 2] = ["Professor", "Sala"];

/// Rows shown on screen
pub const PREVIEW_LIMIT: usize = 20;

/// Shown in place of an empty error list
pub const NO_ERRORS_PLACEHOLDER: &str = "Nenhum erro detectado";

/// Table receiving imported rows
pub const IMPORTS_TABLE: &str = "imports";

/// Header line plus 1-based numbering
const DISPLAY_ROW_OFFSET: usize = 2;

/// A required column that is empty or absent in one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Line number as seen in the spreadsheet (header is line 1)
    pub row: usize,
    pub column: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Linha {}: {} ausente", self.row, self.column)
    }
}

/// Check the required columns of every row, in row order
pub fn validate(rows: &[Row]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        for column in REQUIRED_COLUMNS {
            if row.get(column).is_none_or(str::is_empty) {
                errors.push(ValidationError {
                    row: index + DISPLAY_ROW_OFFSET,
                    column: column.to_string(),
                });
            }
        }
    }
    errors
}

/// Lines for the error list; never empty
pub fn error_list(errors: &[ValidationError]) -> Vec<String> {
    if errors.is_empty() {
        vec![NO_ERRORS_PLACEHOLDER.to_string()]
    } else {
        errors.iter().map(ToString::to_string).collect()
    }
}

/// All rows decoded from one uploaded file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportBatch {
    file_name: String,
    rows: Vec<Row>,
}

impl ImportBatch {
    pub fn new(file_name: impl Into<String>, rows: Vec<Row>) -> Self {
        ImportBatch {
            file_name: file_name.into(),
            rows,
        }
    }

    /// Decode an uploaded file
    pub fn decode(file_name: &str, bytes: &[u8]) -> Result<Self, ImportError> {
        Ok(Self::new(file_name, loader::load_rows(file_name, bytes)?))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Display-only prefix of the batch
    pub fn preview(&self) -> &[Row] {
        &self.rows[..self.rows.len().min(PREVIEW_LIMIT)]
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        validate(&self.rows)
    }

    /// One `{payload: row}` record per row of the whole batch
    pub fn records(&self) -> Vec<Value> {
        self.rows.iter().map(|row| json!({ "payload": row })).collect()
    }
}

/// Bulk-insert a batch into the imports table
pub struct SubmitImport<'a> {
    pub batch: &'a ImportBatch,
}

/// Successful submission
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSaved {
    /// Records the backend reports as inserted
    pub inserted: usize,
}

impl ImportSaved {
    pub fn message(&self) -> String {
        format!("Import salvo: {} linhas", self.inserted)
    }
}

impl SubmitImport<'_> {
    pub async fn execute(
        &self,
        backend: &dyn Backend,
        token: Option<&str>,
    ) -> Result<ImportSaved, BackendError> {
        if self.batch.is_empty() {
            return Ok(ImportSaved { inserted: 0 });
        }

        let inserted = backend
            .insert(IMPORTS_TABLE, self.batch.records(), token)
            .await?;
        Ok(ImportSaved {
            inserted: inserted.len(),
        })
    }
}

/// Message for a failed submission
pub fn failure_message(err: &BackendError) -> String {
    format!("Erro ao salvar import: {}", err.message())
}

fn import_page(user: &CurrentUser, batch: Option<&ImportBatch>, notice: Option<Notice>) -> ImportPage {
    let shell = Shell {
        active: "import",
        user_email: user.user.display_name(),
    };

    let Some(batch) = batch else {
        return ImportPage {
            shell,
            file_name: None,
            total_rows: 0,
            preview_rows: 0,
            columns: Vec::new(),
            table: Vec::new(),
            preview_json: "[]".to_string(),
            errors: error_list(&[]),
            notice,
        };
    };

    let preview = batch.preview();
    let columns: Vec<String> = preview
        .first()
        .map(|row| row.columns().map(str::to_string).collect())
        .unwrap_or_default();
    let table = preview
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| row.get(column).unwrap_or_default().to_string())
                .collect()
        })
        .collect();

    ImportPage {
        shell,
        file_name: Some(batch.file_name().to_string()),
        total_rows: batch.len(),
        preview_rows: preview.len(),
        columns,
        table,
        preview_json: serde_json::to_string_pretty(preview).unwrap_or_else(|_| "[]".to_string()),
        errors: error_list(&batch.validate()),
        notice,
    }
}

fn render_import(
    state: &SharedState,
    user: &CurrentUser,
    batch: Option<&ImportBatch>,
    notice: Option<Notice>,
) -> Result<Response, AppError> {
    let page = import_page(user, batch, notice);
    Ok(state.views.render(views::IMPORT, &page)?.into_response())
}

// Web handlers

/// Import screen, showing the pending batch if there is one
pub async fn serve_import(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let batch = state.sessions.pending_import(&user.session_id);
    render_import(&state, &user, batch.as_deref(), None)
}

/// Decode an uploaded spreadsheet and keep it as the session's pending batch
pub async fn handle_upload(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            if !file_name.is_empty() || !bytes.is_empty() {
                upload = Some((file_name, bytes));
            }
        }
    }

    // No file selected: nothing to do
    let Some((file_name, bytes)) = upload else {
        let batch = state.sessions.pending_import(&user.session_id);
        return render_import(&state, &user, batch.as_deref(), None);
    };

    match ImportBatch::decode(&file_name, &bytes) {
        Ok(batch) => {
            info!(
                "decoded {} rows from {} for {}",
                batch.len(),
                file_name,
                user.user.display_name()
            );
            let page = render_import(&state, &user, Some(&batch), None);
            state
                .sessions
                .set_pending_import(&user.session_id, Some(batch));
            page
        }
        Err(err) => {
            warn!("could not decode {}: {}", file_name, err);
            state.sessions.set_pending_import(&user.session_id, None);
            let notice = Notice::error(format!("Erro ao ler arquivo: {}", err));
            render_import(&state, &user, None, Some(notice))
        }
    }
}

/// Submit the whole pending batch
pub async fn handle_confirm(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let batch = state
        .sessions
        .pending_import(&user.session_id)
        .unwrap_or_default();

    match (SubmitImport { batch: &batch })
        .execute(state.backend.as_ref(), user.token())
        .await
    {
        Ok(saved) => {
            info!(
                "imported {} rows for {}",
                saved.inserted,
                user.user.display_name()
            );
            state.sessions.set_pending_import(&user.session_id, None);
            render_import(&state, &user, None, Some(Notice::success(saved.message())))
        }
        Err(err) => {
            warn!("import submission failed: {}", err);
            render_import(
                &state,
                &user,
                Some(batch.as_ref()).filter(|b| !b.is_empty()),
                Some(Notice::error(failure_message(&err))),
            )
        }
    }
}
