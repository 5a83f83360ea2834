use std::convert::Infallible;

use axum::Json;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::engine::{AppointmentPatch, NewAppointment};

use super::dto::*;
use super::extract::{ApiQuery, IdPath, ValidJson};
use super::{ApiError, Session};

pub async fn create(
    session: Session,
    ValidJson(body): ValidJson<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentDto>), ApiError> {
    let appointment = session
        .engine
        .create_appointment(NewAppointment::from(body), &session.ctx())
        .await?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

pub async fn list(
    session: Session,
    ApiQuery(query): ApiQuery<AppointmentQuery>,
) -> Json<Vec<AppointmentDto>> {
    let appointments = session.engine.list_appointments(&query.into()).await;
    Json(appointments.into_iter().map(AppointmentDto::from).collect())
}

pub async fn get_one(session: Session, IdPath(id): IdPath) -> Result<Json<AppointmentDto>, ApiError> {
    Ok(Json(session.engine.get_appointment(id).await?.into()))
}

pub async fn update(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<UpdateAppointmentRequest>,
) -> Result<Json<AppointmentDto>, ApiError> {
    let appointment = session
        .engine
        .update_appointment(id, AppointmentPatch::from(body), &session.ctx())
        .await?;
    Ok(Json(appointment.into()))
}

pub async fn change_status(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<StatusChangeRequest>,
) -> Result<Json<AppointmentDto>, ApiError> {
    let appointment = session
        .engine
        .transition_status(id, body.status, body.reason, &session.ctx())
        .await?;
    Ok(Json(appointment.into()))
}

pub async fn delete(session: Session, IdPath(id): IdPath) -> Result<StatusCode, ApiError> {
    session.engine.delete_appointment(id, &session.ctx()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn link_transaction(
    session: Session,
    IdPath(id): IdPath,
    ValidJson(body): ValidJson<TransactionRequest>,
) -> Result<Json<AppointmentDto>, ApiError> {
    let appointment = session
        .engine
        .link_transaction(id, body.reference, &session.ctx())
        .await?;
    Ok(Json(appointment.into()))
}

pub async fn availability(
    session: Session,
    ApiQuery(query): ApiQuery<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let slots = session
        .engine
        .list_available_slots(query.staff_id, query.service_id, query.date, query.location_id)
        .await?;
    Ok(Json(AvailabilityResponse {
        staff_id: query.staff_id,
        service_id: query.service_id,
        location_id: query.location_id,
        date: query.date,
        slots: slots.into_iter().map(TimeSlot::from).collect(),
    }))
}

pub async fn conflicts(
    session: Session,
    IdPath(staff_id): IdPath,
    ApiQuery(query): ApiQuery<ConflictQuery>,
) -> Result<Json<Vec<AppointmentDto>>, ApiError> {
    let hits = session
        .engine
        .find_conflicts(staff_id, query.span(), query.exclude_id)
        .await?;
    Ok(Json(hits.into_iter().map(AppointmentDto::from).collect()))
}

/// Server-sent stream of the tenant's domain events, optionally narrowed
/// to one staff member. Slow consumers skip what they missed.
pub async fn events(
    session: Session,
    ApiQuery(query): ApiQuery<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let rx = match query.staff_id {
        Some(staff_id) => {
            session.engine.get_staff(&staff_id)?;
            session.engine.notify.subscribe_staff(staff_id)
        }
        None => session.engine.notify.subscribe(),
    };
    let tenant = session.tenant;

    let stream = futures::stream::unfold(rx, move |mut rx| {
        let tenant = tenant.clone();
        async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let dto = EventDto::from(event);
                        let frame = match SseEvent::default().event(dto.kind).json_data(&dto) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(%tenant, "dropping unserializable event: {e}");
                                continue;
                            }
                        };
                        return Some((Ok(frame), rx));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%tenant, skipped, "event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
