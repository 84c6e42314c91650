use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use axum::{
    Form,
    extract::{Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::{info, warn};
use rand::{Rng, distributions::Alphanumeric};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::SharedState;
use crate::backend::{AuthSession, Backend, BackendError, LinkProof, MagicLinkRequest};
use crate::error::AppError;
use crate::import::ImportBatch;
use crate::views::{self, HomePage, Notice};

/// Cookie holding the local session id
pub const SESSION_COOKIE: &str = "session";

/// Cookie holding the PKCE verifier between the link request and its use
pub const VERIFIER_COOKIE: &str = "pkce_verifier";

/// Where a signed-in visitor lands
pub const DASHBOARD_PATH: &str = "/app/dashboard";

pub const LINK_SENT_MESSAGE: &str = "Verifique seu e-mail para link de login (magic link).";
const LINK_WRONG_BROWSER_MESSAGE: &str =
    "Link de login inválido: abra-o no mesmo navegador em que foi solicitado.";

const CODE_VERIFIER_LEN: usize = 64;

/// Signed-in user, as kept by the server
#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub user_id: String,
    pub email: Option<String>,
    /// Access token forwarded to the backend on the user's behalf
    pub access_token: String,
    pub expires_at: SystemTime,
}

impl UserSession {
    pub fn new(session: &AuthSession, now: SystemTime) -> Self {
        UserSession {
            user_id: session.user.id.clone(),
            email: session.user.email.clone(),
            access_token: session.access_token.clone(),
            expires_at: now + Duration::from_secs(session.expires_in),
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }

    /// Name shown in the navigation
    pub fn display_name(&self) -> String {
        self.email.clone().unwrap_or_else(|| self.user_id.clone())
    }
}

/// Authentication state of a visitor
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Anonymous,
    Authenticated(UserSession),
}

impl AuthState {
    /// A followed magic link signs the visitor in, replacing any previous user
    pub fn login(self, session: &AuthSession, now: SystemTime) -> AuthState {
        AuthState::Authenticated(UserSession::new(session, now))
    }

    /// Sign out, returning the user who was signed in
    pub fn logout(&mut self) -> Option<UserSession> {
        match std::mem::replace(self, AuthState::Anonymous) {
            AuthState::Anonymous => None,
            AuthState::Authenticated(user) => Some(user),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    /// Whether the backend token behind this state has run out
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.user().is_some_and(|user| user.is_expired(now))
    }

    pub fn user(&self) -> Option<&UserSession> {
        match self {
            AuthState::Anonymous => None,
            AuthState::Authenticated(user) => Some(user),
        }
    }
}

struct SessionEntry {
    state: AuthState,
    /// Spreadsheet decoded on the import screen, waiting for confirmation
    pending_import: Option<Arc<ImportBatch>>,
}

/// Active sessions, keyed by the id stored in the session cookie
///
/// Lives in the application state; nothing here outlives the process.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session for a verified backend session and return its id
    pub fn login(&self, session: &AuthSession) -> String {
        let now = SystemTime::now();
        let state = AuthState::Anonymous.login(session, now);

        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.write();
        sessions.retain(|_, entry| !entry.state.is_expired(now));
        sessions.insert(
            session_id.clone(),
            SessionEntry {
                state,
                pending_import: None,
            },
        );
        session_id
    }

    /// State of the visitor holding `session_id`; expired sessions are signed out
    pub fn auth_state(&self, session_id: &str) -> AuthState {
        let state = match self.read().get(session_id) {
            Some(entry) => entry.state.clone(),
            None => return AuthState::Anonymous,
        };

        if state.is_expired(SystemTime::now()) {
            self.logout(session_id);
            return AuthState::Anonymous;
        }
        state
    }

    /// Sign a session out and forget it, returning the user it belonged to
    pub fn logout(&self, session_id: &str) -> Option<UserSession> {
        let mut entry = self.write().remove(session_id)?;
        entry.state.logout()
    }

    pub fn pending_import(&self, session_id: &str) -> Option<Arc<ImportBatch>> {
        self.read()
            .get(session_id)
            .and_then(|entry| entry.pending_import.clone())
    }

    /// Replace (or clear, with `None`) the session's pending import
    pub fn set_pending_import(&self, session_id: &str, batch: Option<ImportBatch>) {
        if let Some(entry) = self.write().get_mut(session_id) {
            entry.pending_import = batch.map(Arc::new);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random PKCE code verifier (unreserved characters only)
pub fn generate_code_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// Request a magic link for an email address
pub struct SendMagicLink {
    pub email: String,
    pub redirect_to: String,
    pub code_verifier: String,
}

impl SendMagicLink {
    pub async fn execute(&self, backend: &dyn Backend) -> Result<(), BackendError> {
        backend
            .send_magic_link(&MagicLinkRequest {
                email: self.email.clone(),
                redirect_to: Some(self.redirect_to.clone()),
                code_challenge: Some(self.code_verifier.clone()),
            })
            .await
    }
}

/// Session of the request, inserted by [`require_auth`]
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session_id: String,
    pub user: UserSession,
}

impl CurrentUser {
    pub fn token(&self) -> Option<&str> {
        Some(self.user.access_token.as_str())
    }
}

fn session_cookie(state: &SharedState, session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.secure_cookies)
        .build()
}

fn verifier_cookie(state: &SharedState, verifier: String) -> Cookie<'static> {
    Cookie::build((VERIFIER_COOKIE, verifier))
        .path("/auth")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.secure_cookies)
        .build()
}

fn render_home(state: &SharedState, page: &HomePage) -> Result<Response, AppError> {
    Ok(state.views.render(views::HOME, page)?.into_response())
}

// Web handlers

/// Sign-in screen; signed-in visitors go straight to the dashboard
pub async fn serve_home(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.auth_state(cookie.value()).is_authenticated() {
            return Ok(Redirect::to(DASHBOARD_PATH).into_response());
        }
    }
    render_home(&state, &HomePage::default())
}

#[derive(Debug, Deserialize)]
pub struct MagicLinkForm {
    pub email: String,
}

/// Send the sign-in link and remember the PKCE verifier in this browser
pub async fn handle_magic_link(
    State(state): State<SharedState>,
    jar: CookieJar,
    Form(form): Form<MagicLinkForm>,
) -> Result<Response, AppError> {
    let command = SendMagicLink {
        email: form.email.trim().to_string(),
        redirect_to: state.config.auth_redirect_url(),
        code_verifier: generate_code_verifier(),
    };

    match command.execute(state.backend.as_ref()).await {
        Ok(()) => {
            info!("magic link requested for {}", command.email);
            let page = HomePage {
                email: command.email.clone(),
                notice: Some(Notice::success(LINK_SENT_MESSAGE)),
            };
            let jar = jar.add(verifier_cookie(&state, command.code_verifier));
            Ok((jar, render_home(&state, &page)?).into_response())
        }
        Err(err) => {
            warn!("magic link request failed: {}", err);
            let page = HomePage {
                email: command.email,
                notice: Some(Notice::error(err.message())),
            };
            render_home(&state, &page)
        }
    }
}

/// Parameters the emailed link carries back
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmQuery {
    pub code: Option<String>,
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub error_description: Option<String>,
}

/// Exchange the followed link for a session
pub async fn handle_confirm(
    State(state): State<SharedState>,
    jar: CookieJar,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response, AppError> {
    // Expired or already used links come back with the reason instead of a code
    if let Some(description) = query.error_description {
        let page = HomePage {
            notice: Some(Notice::error(description)),
            ..HomePage::default()
        };
        return render_home(&state, &page);
    }

    let proof = match (query.code, query.token_hash) {
        (Some(code), _) => match jar.get(VERIFIER_COOKIE) {
            Some(verifier) => LinkProof::Code {
                code,
                verifier: verifier.value().to_string(),
            },
            None => {
                let page = HomePage {
                    notice: Some(Notice::error(LINK_WRONG_BROWSER_MESSAGE)),
                    ..HomePage::default()
                };
                return render_home(&state, &page);
            }
        },
        (None, Some(token_hash)) => LinkProof::TokenHash {
            token_hash,
            kind: query.kind.unwrap_or_else(|| "magiclink".to_string()),
        },
        (None, None) => return Ok(Redirect::to("/").into_response()),
    };

    match state.backend.verify_link(&proof).await {
        Ok(session) => {
            let session_id = state.sessions.login(&session);
            info!(
                "signed in {}",
                session.user.email.as_deref().unwrap_or(&session.user.id)
            );
            let jar = jar
                .remove(Cookie::build(VERIFIER_COOKIE).path("/auth"))
                .add(session_cookie(&state, session_id));
            Ok((jar, Redirect::to(DASHBOARD_PATH)).into_response())
        }
        Err(err) => {
            warn!("magic link verification failed: {}", err);
            let page = HomePage {
                notice: Some(Notice::error(err.message())),
                ..HomePage::default()
            };
            render_home(&state, &page)
        }
    }
}

/// Sign out locally and at the backend
pub async fn handle_logout(State(state): State<SharedState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(user) = state.sessions.logout(cookie.value()) {
            if let Err(err) = state.backend.sign_out(&user.access_token).await {
                warn!("backend sign-out failed for {}: {}", user.display_name(), err);
            }
            info!("signed out {}", user.display_name());
        }
    }

    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
        .into_response()
}

/// Authentication middleware for the app shell
///
/// Anonymous visitors are sent to the sign-in screen; otherwise the request
/// carries a [`CurrentUser`] extension.
pub async fn require_auth(
    State(state): State<SharedState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let AuthState::Authenticated(user) = state.sessions.auth_state(cookie.value()) {
            request.extensions_mut().insert(CurrentUser {
                session_id: cookie.value().to_string(),
                user,
            });
            return next.run(request).await;
        }
    }

    Redirect::to("/").into_response()
}
