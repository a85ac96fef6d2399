//! Synchronous journal entry CRUD.

use crate::{record_id, ApiError, AppState};
use api_shared::{ErrorRes, JournalEntryReq, JournalEntryRes, ListJournalEntriesRes, Role};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use journal_core::{JournalEntry, JournalEntryData};

fn listing(entries: Vec<JournalEntry>) -> Json<ListJournalEntriesRes> {
    Json(ListJournalEntriesRes {
        entries: entries.into_iter().map(JournalEntryRes::from).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/api/journal-entries",
    responses(
        (status = 200, description = "All journal entries", body = ListJournalEntriesRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_journal_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListJournalEntriesRes>, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    Ok(listing(state.query.journal_entries()))
}

#[utoipa::path(
    get,
    path = "/api/journal-entries/patient/{patient_id}",
    params(("patient_id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "The patient's entries, newest first", body = ListJournalEntriesRes),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn journal_entries_for_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(patient_id): Path<i64>,
) -> Result<Json<ListJournalEntriesRes>, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let entries = state
        .query
        .journal_entries_for_patient(record_id(patient_id)?)?;
    Ok(listing(entries))
}

#[utoipa::path(
    get,
    path = "/api/journal-entries/{id}",
    params(("id" = i64, Path, description = "Journal entry id")),
    responses(
        (status = 200, description = "The journal entry", body = JournalEntryRes),
        (status = 404, description = "No such journal entry", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_journal_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<JournalEntryRes>, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let entry = state.query.journal_entry(record_id(id)?)?;
    Ok(Json(entry.into()))
}

#[utoipa::path(
    post,
    path = "/api/journal-entries",
    request_body = JournalEntryReq,
    responses(
        (status = 201, description = "Journal entry created", body = JournalEntryRes),
        (status = 400, description = "Invalid journal entry", body = ErrorRes),
        (status = 404, description = "Patient does not exist", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_journal_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JournalEntryReq>,
) -> Result<(StatusCode, Json<JournalEntryRes>), ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let entry = state.journal.create(JournalEntryData::try_from(req)?)?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

#[utoipa::path(
    put,
    path = "/api/journal-entries/{id}",
    params(("id" = i64, Path, description = "Journal entry id")),
    request_body = JournalEntryReq,
    responses(
        (status = 200, description = "Journal entry updated", body = JournalEntryRes),
        (status = 404, description = "No such journal entry", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_journal_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<JournalEntryReq>,
) -> Result<Json<JournalEntryRes>, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let entry = state
        .journal
        .update(record_id(id)?, JournalEntryData::try_from(req)?)?;
    Ok(Json(entry.into()))
}

#[utoipa::path(
    delete,
    path = "/api/journal-entries/{id}",
    params(("id" = i64, Path, description = "Journal entry id")),
    responses(
        (status = 204, description = "Journal entry deleted"),
        (status = 404, description = "No such journal entry", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_journal_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    state.journal.delete(record_id(id)?)?;
    Ok(StatusCode::NO_CONTENT)
}
