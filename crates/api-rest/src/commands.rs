//! Asynchronous command endpoints.
//!
//! Each endpoint validates the request, publishes one command and answers `202 Accepted` as
//! soon as the channel has taken it. The record is changed later by the mutation engine.

use crate::{record_id, ApiError, AppState};
use api_shared::{CommandAcceptedRes, ErrorRes, JournalEntryReq, PatientReq, Role};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use journal_core::{JournalEntryData, PatientData};
use journal_messaging::Accepted;

type AcceptedResponse = (StatusCode, Json<CommandAcceptedRes>);

fn accepted(receipt: Accepted, message: &str) -> AcceptedResponse {
    (
        StatusCode::ACCEPTED,
        Json(CommandAcceptedRes {
            command_id: receipt.command_id.to_string(),
            topic: receipt.topic,
            partition: receipt.partition,
            offset: receipt.offset,
            message: message.to_string(),
        }),
    )
}

#[utoipa::path(
    post,
    path = "/api/commands/patients",
    request_body = PatientReq,
    responses(
        (status = 202, description = "CREATE command queued", body = CommandAcceptedRes),
        (status = 400, description = "Invalid patient", body = ErrorRes),
        (status = 503, description = "Command channel unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_patient_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PatientReq>,
) -> Result<AcceptedResponse, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let receipt = state
        .patient_commands
        .create(PatientData::try_from(req)?)
        .await?;
    Ok(accepted(
        receipt,
        "CREATE command queued, the patient is created asynchronously",
    ))
}

#[utoipa::path(
    put,
    path = "/api/commands/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    request_body = PatientReq,
    responses(
        (status = 202, description = "UPDATE command queued", body = CommandAcceptedRes),
        (status = 400, description = "Invalid patient", body = ErrorRes),
        (status = 503, description = "Command channel unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_patient_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<PatientReq>,
) -> Result<AcceptedResponse, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let receipt = state
        .patient_commands
        .update(record_id(id)?, PatientData::try_from(req)?)
        .await?;
    Ok(accepted(
        receipt,
        "UPDATE command queued, the patient is updated asynchronously",
    ))
}

#[utoipa::path(
    delete,
    path = "/api/commands/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 202, description = "DELETE command queued", body = CommandAcceptedRes),
        (status = 503, description = "Command channel unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_patient_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<AcceptedResponse, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let receipt = state.patient_commands.delete(record_id(id)?).await?;
    Ok(accepted(
        receipt,
        "DELETE command queued, the patient is deleted asynchronously",
    ))
}

#[utoipa::path(
    post,
    path = "/api/commands/journal-entries",
    request_body = JournalEntryReq,
    responses(
        (status = 202, description = "CREATE command queued", body = CommandAcceptedRes),
        (status = 400, description = "Invalid journal entry", body = ErrorRes),
        (status = 503, description = "Command channel unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_journal_entry_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JournalEntryReq>,
) -> Result<AcceptedResponse, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let receipt = state
        .journal_commands
        .create(JournalEntryData::try_from(req)?)
        .await?;
    Ok(accepted(
        receipt,
        "CREATE command queued, the journal entry is created asynchronously",
    ))
}

#[utoipa::path(
    put,
    path = "/api/commands/journal-entries/{id}",
    params(("id" = i64, Path, description = "Journal entry id")),
    request_body = JournalEntryReq,
    responses(
        (status = 202, description = "UPDATE command queued", body = CommandAcceptedRes),
        (status = 400, description = "Invalid journal entry", body = ErrorRes),
        (status = 503, description = "Command channel unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_journal_entry_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<JournalEntryReq>,
) -> Result<AcceptedResponse, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let receipt = state
        .journal_commands
        .update(record_id(id)?, JournalEntryData::try_from(req)?)
        .await?;
    Ok(accepted(
        receipt,
        "UPDATE command queued, the journal entry is updated asynchronously",
    ))
}

#[utoipa::path(
    delete,
    path = "/api/commands/journal-entries/{id}",
    params(("id" = i64, Path, description = "Journal entry id")),
    responses(
        (status = 202, description = "DELETE command queued", body = CommandAcceptedRes),
        (status = 503, description = "Command channel unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_journal_entry_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<AcceptedResponse, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let receipt = state.journal_commands.delete(record_id(id)?).await?;
    Ok(accepted(
        receipt,
        "DELETE command queued, the journal entry is deleted asynchronously",
    ))
}
