//! Synchronous patient CRUD.

use crate::{record_id, ApiError, AppState};
use api_shared::{ErrorRes, ListPatientsRes, PatientReq, PatientRes, Role};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use journal_core::PatientData;

#[utoipa::path(
    get,
    path = "/api/patients",
    responses(
        (status = 200, description = "All patients", body = ListPatientsRes),
        (status = 401, description = "Missing or unknown bearer token", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_patients(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListPatientsRes>, ApiError> {
    state.authorize(&headers, Role::PATIENT_READERS)?;
    let patients = state
        .query
        .patients()
        .into_iter()
        .map(PatientRes::from)
        .collect();
    Ok(Json(ListPatientsRes { patients }))
}

#[utoipa::path(
    get,
    path = "/api/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "The patient", body = PatientRes),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<PatientRes>, ApiError> {
    state.authorize(&headers, Role::PATIENT_READERS)?;
    let patient = state.query.patient(record_id(id)?)?;
    Ok(Json(patient.into()))
}

#[utoipa::path(
    post,
    path = "/api/patients",
    request_body = PatientReq,
    responses(
        (status = 201, description = "Patient created", body = PatientRes),
        (status = 400, description = "Invalid patient", body = ErrorRes),
        (status = 409, description = "Personal number already registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PatientReq>,
) -> Result<(StatusCode, Json<PatientRes>), ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let patient = state.patients.create(PatientData::try_from(req)?)?;
    Ok((StatusCode::CREATED, Json(patient.into())))
}

#[utoipa::path(
    put,
    path = "/api/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    request_body = PatientReq,
    responses(
        (status = 200, description = "Patient updated", body = PatientRes),
        (status = 400, description = "Invalid patient", body = ErrorRes),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<PatientReq>,
) -> Result<Json<PatientRes>, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    let patient = state
        .patients
        .update(record_id(id)?, PatientData::try_from(req)?)?;
    Ok(Json(patient.into()))
}

#[utoipa::path(
    delete,
    path = "/api/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 204, description = "Patient and their journal entries deleted"),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.authorize(&headers, Role::CLINICIANS)?;
    state.patients.delete(record_id(id)?)?;
    Ok(StatusCode::NO_CONTENT)
}
