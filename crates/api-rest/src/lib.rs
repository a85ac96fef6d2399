//! # API REST
//!
//! REST API for the patient journal.
//!
//! Handles:
//! - Synchronous CRUD over patients and journal entries
//! - Asynchronous command submission (`/api/commands/...`, answered with `202 Accepted`)
//! - Bearer-token authorisation, CORS and OpenAPI/Swagger documentation
//!
//! Uses `api-shared` for request/response bodies and authorisation.

#![warn(rust_2018_idioms)]

mod commands;
mod error;
mod journal;
mod patients;

pub use error::ApiError;

use api_shared::{
    ApiTokens, CommandAcceptedRes, ErrorRes, HealthRes, HealthService, JournalEntryReq,
    JournalEntryRes, ListJournalEntriesRes, ListPatientsRes, PatientReq, PatientRes, Role,
};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    response::Json,
    routing::get,
    Router,
};
use journal_core::{
    JournalEntry, JournalService, Patient, PatientService, QueryService, RecordError, RecordId,
};
use journal_messaging::{CommandProducer, Pipeline};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    query: QueryService,
    patients: PatientService,
    journal: JournalService,
    patient_commands: CommandProducer<Patient>,
    journal_commands: CommandProducer<JournalEntry>,
    tokens: Arc<ApiTokens>,
}

impl AppState {
    /// Build handler state over a running pipeline and the store it wraps.
    pub fn new(pipeline: &Pipeline, tokens: ApiTokens) -> Self {
        let store = pipeline.store().clone();
        Self {
            query: QueryService::new(store.clone()),
            patients: PatientService::new(store.clone()),
            journal: JournalService::new(store),
            patient_commands: pipeline.patient_commands().clone(),
            journal_commands: pipeline.journal_commands().clone(),
            tokens: Arc::new(tokens),
        }
    }

    pub(crate) fn authorize(&self, headers: &HeaderMap, allowed: &[Role]) -> Result<(), ApiError> {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        self.tokens.authorize(authorization, allowed)?;
        Ok(())
    }
}

pub(crate) fn record_id(raw: i64) -> Result<RecordId, ApiError> {
    RecordId::new(raw).map_err(|e| RecordError::from(e).into())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        patients::list_patients,
        patients::get_patient,
        patients::create_patient,
        patients::update_patient,
        patients::delete_patient,
        journal::list_journal_entries,
        journal::journal_entries_for_patient,
        journal::get_journal_entry,
        journal::create_journal_entry,
        journal::update_journal_entry,
        journal::delete_journal_entry,
        commands::create_patient_command,
        commands::update_patient_command,
        commands::delete_patient_command,
        commands::create_journal_entry_command,
        commands::update_journal_entry_command,
        commands::delete_journal_entry_command,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        PatientReq,
        PatientRes,
        ListPatientsRes,
        JournalEntryReq,
        JournalEntryRes,
        ListJournalEntriesRes,
        CommandAcceptedRes,
    ))
)]
pub struct ApiDoc;

/// The complete REST application: API routes, Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/api/patients/:id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route(
            "/api/journal-entries",
            get(journal::list_journal_entries).post(journal::create_journal_entry),
        )
        .route(
            "/api/journal-entries/:id",
            get(journal::get_journal_entry)
                .put(journal::update_journal_entry)
                .delete(journal::delete_journal_entry),
        )
        .route(
            "/api/journal-entries/patient/:patient_id",
            get(journal::journal_entries_for_patient),
        )
        .route(
            "/api/commands/patients",
            axum::routing::post(commands::create_patient_command),
        )
        .route(
            "/api/commands/patients/:id",
            axum::routing::put(commands::update_patient_command)
                .delete(commands::delete_patient_command),
        )
        .route(
            "/api/commands/journal-entries",
            axum::routing::post(commands::create_journal_entry_command),
        )
        .route(
            "/api/commands/journal-entries/:id",
            axum::routing::put(commands::update_journal_entry_command)
                .delete(commands::delete_journal_entry_command),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint, open to unauthenticated callers.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}
