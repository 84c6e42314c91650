/*!
# UNIBAVE - Gestão de Horários

A small internal web tool for managing a school's class schedules, backed by a
hosted backend-as-a-service (Supabase-compatible REST API).

## Overview

Visitors sign in with a magic link sent to their e-mail. Signed-in users get an
app shell with three screens:

- **Dashboard**: a demo form that writes one record to the `schedules` table
- **Configurações**: uploads a logo image to a public storage bucket
- **Importar**: uploads a `.xlsx`/`.csv` spreadsheet, previews its first rows,
  flags rows missing the required `Professor`/`Sala` columns and, on
  confirmation, bulk-inserts every row into the `imports` table

Nothing is stored locally: sessions and pending imports live in memory for the
lifetime of the process.

## Architecture

- **Backend client**: the `Backend` trait and its HTTP implementation
- **Loader**: decodes uploaded spreadsheets into header-keyed rows
- **Commands**: one struct per user action (`SendMagicLink`, `SaveSchedule`,
  `UploadLogo`, `SubmitImport`) returning a typed outcome
- **Web layer**: axum router, cookie sessions and handlebars views

## Modules

- **app**: Routing, shared state and server startup
- **backend**: Backend trait, Supabase client and wire types
- **config**: Environment/CLI configuration
- **error**: Internal handler errors
- **import**: Import batches, validation, preview and submission
- **loader**: CSV and workbook decoding
- **login**: Magic-link sign-in, sessions and the auth middleware
- **schedule**: Dashboard schedule demo
- **settings**: Logo upload
- **views**: Page templates
*/

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod import;
pub mod loader;
pub mod login;
pub mod schedule;
pub mod settings;
pub mod views;

pub use app::{AppState, SharedState, router, run};
pub use backend::{Backend, BackendError, SupabaseClient};
pub use config::{Config, ConfigError, Overrides, load_env_file};
pub use import::{ImportBatch, ValidationError};
pub use loader::{ImportError, Row};
pub use login::{AuthState, SessionStore, UserSession};
