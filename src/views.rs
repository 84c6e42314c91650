//! Page rendering
//!
//! Pages are handlebars templates compiled into the binary. Each screen
//! fills one of the context structs below; the `shell` partial wraps the
//! authenticated screens with the side navigation.

use axum::response::Html;
use handlebars::{Handlebars, TemplateError};
use serde::Serialize;

use crate::error::AppError;

pub const HOME: &str = "home";
pub const DASHBOARD: &str = "dashboard";
pub const CONFIG: &str = "config";
pub const IMPORT: &str = "import";

/// Compiled templates
pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_partial("shell", include_str!("./templates/shell.hbs"))?;
        registry.register_template_string(HOME, include_str!("./templates/home.hbs"))?;
        registry.register_template_string(DASHBOARD, include_str!("./templates/dashboard.hbs"))?;
        registry.register_template_string(CONFIG, include_str!("./templates/config.hbs"))?;
        registry.register_template_string(IMPORT, include_str!("./templates/import.hbs"))?;
        Ok(Views { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>, AppError> {
        Ok(Html(self.registry.render(name, data)?))
    }
}

/// Transient message shown after an action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub text: String,
    pub kind: NoticeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Notice {
            text: text.into(),
            kind: NoticeKind::Success,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Notice {
            text: text.into(),
            kind: NoticeKind::Error,
        }
    }
}

/// Fields every app-shell screen needs
#[derive(Debug, Clone, Serialize)]
pub struct Shell {
    /// Navigation entry to highlight
    pub active: &'static str,
    pub user_email: String,
}

/// Sign-in screen
#[derive(Debug, Default, Serialize)]
pub struct HomePage {
    pub email: String,
    pub notice: Option<Notice>,
}

/// Dashboard with the schedule demo form
#[derive(Debug, Serialize)]
pub struct DashboardPage {
    pub shell: Shell,
    pub course: String,
    pub discipline: String,
    pub room: String,
    pub notice: Option<Notice>,
}

/// Configuration screen with the logo upload
#[derive(Debug, Serialize)]
pub struct ConfigPage {
    pub shell: Shell,
    pub bucket: String,
    pub logo_url: Option<String>,
    pub notice: Option<Notice>,
}

/// Spreadsheet import screen
#[derive(Debug, Serialize)]
pub struct ImportPage {
    pub shell: Shell,
    pub file_name: Option<String>,
    pub total_rows: usize,
    pub preview_rows: usize,
    pub columns: Vec<String>,
    pub table: Vec<Vec<String>>,
    pub preview_json: String,
    /// Validation messages, or the single "no errors" placeholder
    pub errors: Vec<String>,
    pub notice: Option<Notice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(active: &'static str) -> Shell {
        Shell {
            active,
            user_email: "ana@unibave.net".to_string(),
        }
    }

    #[test]
    fn test_home_renders_sign_in_form() {
        let views = Views::new().unwrap();
        let html = views.render(HOME, &HomePage::default()).unwrap().0;
        assert!(html.contains("UNIBAVE - Gestão de Horários"));
        assert!(html.contains("action=\"/auth/magic-link\""));
        assert!(html.contains("Enviar link de login"));
    }

    #[test]
    fn test_notice_is_escaped() {
        let views = Views::new().unwrap();
        let page = HomePage {
            email: String::new(),
            notice: Some(Notice::error("<script>alert(1)</script>")),
        };
        let html = views.render(HOME, &page).unwrap().0;
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_shell_highlights_active_screen() {
        let views = Views::new().unwrap();
        let page = ConfigPage {
            shell: shell("config"),
            bucket: "public-logos".to_string(),
            logo_url: Some("https://backend.test/logo.png".to_string()),
            notice: None,
        };
        let html = views.render(CONFIG, &page).unwrap().0;
        assert!(html.contains("class=\"active\" href=\"/app/config\""));
        assert!(html.contains("ana@unibave.net"));
        assert!(html.contains("<img src=\"https://backend.test/logo.png\""));
    }

    #[test]
    fn test_dashboard_keeps_form_values() {
        let views = Views::new().unwrap();
        let page = DashboardPage {
            shell: shell("dashboard"),
            course: "Administração".to_string(),
            discipline: "Estatística".to_string(),
            room: "B201".to_string(),
            notice: Some(Notice::success("Registro salvo (id: 7)")),
        };
        let html = views.render(DASHBOARD, &page).unwrap().0;
        assert!(html.contains("value=\"B201\""));
        assert!(html.contains("Registro salvo (id: 7)"));
    }
}
