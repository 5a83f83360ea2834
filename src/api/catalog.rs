//! Catalog and settings endpoints. `PUT /{kind}/{id}` creates or replaces;
//! an `id` in the body, when present, must match the path.

use axum::Json;
use axum::http::StatusCode;
use ulid::Ulid;

use super::dto::*;
use super::extract::{IdPath, ValidJson};
use super::{ApiError, Session};

fn check_body_id(path: Ulid, body: Option<Ulid>) -> Result<(), ApiError> {
    match body {
        Some(id) if id != path => Err(ApiError::bad_request(format!(
            "body id {id} does not match path id {path}"
        ))),
        _ => Ok(()),
    }
}

// ── Locations ───────────────────────────────────────────────────

pub async fn list_locations(session: Session) -> Json<Vec<LocationDto>> {
    Json(session.engine.list_locations().into_iter().map(LocationDto::from).collect())
}

pub async fn get_location(session: Session, IdPath(id): IdPath) -> Result<Json<LocationDto>, ApiError> {
    Ok(Json(session.engine.get_location(&id)?.into()))
}

pub async fn put_location(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<LocationDto>,
) -> Result<Json<LocationDto>, ApiError> {
    check_body_id(id, body.id)?;
    let location = body.into_model(id)?;
    Ok(Json(session.engine.upsert_location(location).await?.into()))
}

// ── Services ────────────────────────────────────────────────────

pub async fn list_services(session: Session) -> Json<Vec<ServiceDto>> {
    Json(session.engine.list_services().into_iter().map(ServiceDto::from).collect())
}

pub async fn get_service(session: Session, IdPath(id): IdPath) -> Result<Json<ServiceDto>, ApiError> {
    Ok(Json(session.engine.get_service(&id)?.into()))
}

pub async fn put_service(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<ServiceDto>,
) -> Result<Json<ServiceDto>, ApiError> {
    check_body_id(id, body.id)?;
    Ok(Json(session.engine.upsert_service(body.into_model(id)).await?.into()))
}

pub async fn delete_service(session: Session, IdPath(id): IdPath) -> Result<StatusCode, ApiError> {
    session.engine.delete_service(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Staff ───────────────────────────────────────────────────────

pub async fn list_staff(session: Session) -> Json<Vec<StaffDto>> {
    Json(session.engine.list_staff().into_iter().map(StaffDto::from).collect())
}

pub async fn get_staff(session: Session, IdPath(id): IdPath) -> Result<Json<StaffDto>, ApiError> {
    Ok(Json(session.engine.get_staff(&id)?.into()))
}

pub async fn put_staff(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<StaffDto>,
) -> Result<Json<StaffDto>, ApiError> {
    check_body_id(id, body.id)?;
    Ok(Json(session.engine.upsert_staff(body.into_model(id)).await?.into()))
}

pub async fn delete_staff(session: Session, IdPath(id): IdPath) -> Result<StatusCode, ApiError> {
    session.engine.delete_staff(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Clients ─────────────────────────────────────────────────────

pub async fn list_clients(session: Session) -> Json<Vec<ClientDto>> {
    Json(session.engine.list_clients().into_iter().map(ClientDto::from).collect())
}

pub async fn get_client(session: Session, IdPath(id): IdPath) -> Result<Json<ClientDto>, ApiError> {
    Ok(Json(session.engine.get_client(&id)?.into()))
}

pub async fn put_client(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<ClientDto>,
) -> Result<Json<ClientDto>, ApiError> {
    check_body_id(id, body.id)?;
    Ok(Json(session.engine.upsert_client(body.into_model(id)).await?.into()))
}

pub async fn delete_client(session: Session, IdPath(id): IdPath) -> Result<StatusCode, ApiError> {
    session.engine.delete_client(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Settings ────────────────────────────────────────────────────

pub async fn get_settings(session: Session) -> Json<SettingsDto> {
    Json(session.engine.settings().await.into())
}

pub async fn put_settings(
    session: Session,
    ValidJson(body): ValidJson<SettingsDto>,
) -> Result<Json<SettingsDto>, ApiError> {
    Ok(Json(session.engine.update_settings(body.into()).await?.into()))
}
