//! Dashboard schedule demo: writes one record to the `schedules` table

use axum::{
    Extension, Form,
    extract::State,
    response::{IntoResponse, Response},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::SharedState;
use crate::backend::{Backend, BackendError};
use crate::error::AppError;
use crate::login::CurrentUser;
use crate::views::{self, DashboardPage, Notice, Shell};

pub const SCHEDULES_TABLE: &str = "schedules";

/// One schedule entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub course: String,
    pub discipline: String,
    pub room: String,
}

impl Default for ScheduleRecord {
    fn default() -> Self {
        ScheduleRecord {
            course: "Administração".to_string(),
            discipline: "Estatística".to_string(),
            room: "B201".to_string(),
        }
    }
}

/// Insert one schedule record
pub struct SaveSchedule {
    pub record: ScheduleRecord,
}

/// The stored record's generated identifier, if the backend returned one
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSaved {
    pub id: Option<String>,
}

impl ScheduleSaved {
    pub fn message(&self) -> String {
        format!("Registro salvo (id: {})", self.id.as_deref().unwrap_or_default())
    }
}

impl SaveSchedule {
    pub async fn execute(
        &self,
        backend: &dyn Backend,
        token: Option<&str>,
    ) -> Result<ScheduleSaved, BackendError> {
        let record = json!({
            "course": self.record.course,
            "discipline": self.record.discipline,
            "room": self.record.room,
        });
        let stored = backend.insert(SCHEDULES_TABLE, vec![record], token).await?;

        let id = stored
            .first()
            .and_then(|row| row.get("id"))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            });
        Ok(ScheduleSaved { id })
    }
}

/// Message for a failed save
pub fn failure_message(err: &BackendError) -> String {
    format!("Erro: {}", err.message())
}

fn render_dashboard(
    state: &SharedState,
    user: &CurrentUser,
    record: ScheduleRecord,
    notice: Option<Notice>,
) -> Result<Response, AppError> {
    let page = DashboardPage {
        shell: Shell {
            active: "dashboard",
            user_email: user.user.display_name(),
        },
        course: record.course,
        discipline: record.discipline,
        room: record.room,
        notice,
    };
    Ok(state.views.render(views::DASHBOARD, &page)?.into_response())
}

// Web handlers

pub async fn serve_dashboard(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    render_dashboard(&state, &user, ScheduleRecord::default(), None)
}

pub async fn handle_save(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Form(record): Form<ScheduleRecord>,
) -> Result<Response, AppError> {
    let command = SaveSchedule { record };
    let notice = match command.execute(state.backend.as_ref(), user.token()).await {
        Ok(saved) => {
            info!("schedule saved with id {:?}", saved.id);
            Notice::success(saved.message())
        }
        Err(err) => {
            warn!("schedule save failed: {}", err);
            Notice::error(failure_message(&err))
        }
    };
    render_dashboard(&state, &user, command.record, Some(notice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{Call, FakeBackend};

    #[tokio::test]
    async fn test_save_reports_generated_id() {
        let backend = FakeBackend::new();
        let command = SaveSchedule {
            record: ScheduleRecord::default(),
        };

        let saved = command.execute(&backend, Some("jwt")).await.unwrap();
        assert_eq!(saved.id.as_deref(), Some("1"));
        assert!(saved.message().contains("1"));
        assert_eq!(saved.message(), "Registro salvo (id: 1)");

        assert_eq!(
            backend.calls(),
            vec![Call::Insert {
                table: "schedules".to_string(),
                records: vec![json!({
                    "course": "Administração",
                    "discipline": "Estatística",
                    "room": "B201",
                })],
                token: Some("jwt".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_save_failure_message() {
        let backend = FakeBackend::failing("relation \"public.schedules\" does not exist");
        let command = SaveSchedule {
            record: ScheduleRecord::default(),
        };

        let err = command.execute(&backend, None).await.unwrap_err();
        assert_eq!(
            failure_message(&err),
            "Erro: relation \"public.schedules\" does not exist"
        );
    }

    #[test]
    fn test_missing_id_leaves_it_blank() {
        assert_eq!(ScheduleSaved { id: None }.message(), "Registro salvo (id: )");
        assert_eq!(
            ScheduleSaved {
                id: Some("7f1c".to_string())
            }
            .message(),
            "Registro salvo (id: 7f1c)"
        );
    }
}
