//! 患者、科室与医生

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use simrs_core::{NewDoctor, NewPatient, PatientUpdate, Principal};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// 患者查询参数
#[derive(Debug, Deserialize)]
pub struct PatientQueryParams {
    pub q: Option<String>,
    /// 按病历号精确查找
    pub mrn: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn search_patients(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<PatientQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:read").await?;
    let patients = match params.mrn {
        Some(mrn) => vec![state.registration.find_by_medical_record_number(&mrn).await?],
        None => {
            state
                .registration
                .search_patients(params.q, params.limit, params.offset)
                .await?
        }
    };

    Ok(Json(json!({
        "total": patients.len(),
        "patients": patients,
    })))
}

pub async fn register_patient(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewPatient>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:write").await?;
    let patient = state.registration.register_patient(request).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:read").await?;
    Ok(Json(state.registration.get_patient(id).await?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(update): Json<PatientUpdate>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:write").await?;
    Ok(Json(state.registration.update_patient(id, update).await?))
}

#[derive(Debug, Deserialize)]
pub struct PolyclinicQueryParams {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewPolyclinicRequest {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PolyclinicUpdateRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list_polyclinics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<PolyclinicQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:read").await?;
    let polyclinics = state.registration.list_polyclinics(params.active_only).await?;
    Ok(Json(json!({
        "total": polyclinics.len(),
        "polyclinics": polyclinics,
    })))
}

pub async fn create_polyclinic(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewPolyclinicRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "polyclinics:manage").await?;
    let polyclinic = state
        .registration
        .create_polyclinic(&request.code, &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(polyclinic)))
}

pub async fn get_polyclinic(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:read").await?;
    Ok(Json(state.registration.get_polyclinic(id).await?))
}

pub async fn update_polyclinic(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<PolyclinicUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "polyclinics:manage").await?;
    let polyclinic = state
        .registration
        .update_polyclinic(id, request.name, request.is_active)
        .await?;
    Ok(Json(polyclinic))
}

#[derive(Debug, Deserialize)]
pub struct DoctorQueryParams {
    pub polyclinic_id: Option<Uuid>,
}

pub async fn list_doctors(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<DoctorQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:read").await?;
    let doctors = state.registration.list_doctors(params.polyclinic_id).await?;
    Ok(Json(json!({
        "total": doctors.len(),
        "doctors": doctors,
    })))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewDoctor>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "doctors:manage").await?;
    let doctor = state.registration.create_doctor(request).await?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "patients:read").await?;
    Ok(Json(state.registration.get_doctor(id).await?))
}
