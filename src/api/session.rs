use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::engine::{BookingContext, Engine};
use crate::model::{Actor, FeatureEntitlements};
use crate::observability::AUTH_FAILURES_TOTAL;

use super::{ApiError, AppState};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor";

/// Everything a handler needs about the caller, extracted per request.
/// Nothing about the caller lives in global state.
pub struct Session {
    pub tenant: String,
    pub engine: Arc<Engine>,
    pub actor: Actor,
    pub entitlements: FeatureEntitlements,
}

impl Session {
    pub fn ctx(&self) -> BookingContext {
        BookingContext {
            actor: self.actor,
            entitlements: self.entitlements,
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::bad_request(format!("{name} header is not valid text")))
        })
        .transpose()
}

/// Compare without short-circuiting on the first differing byte.
fn token_matches(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn authenticate(parts: &Parts, expected: &str) -> Result<(), ApiError> {
    let given = header(parts, AUTHORIZATION.as_str())
        .ok()
        .flatten()
        .and_then(|v| v.strip_prefix("Bearer "));
    match given {
        Some(token) if token_matches(token.trim(), expected) => Ok(()),
        _ => {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            Err(ApiError::Unauthenticated)
        }
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, &state.api_token)?;

        let tenant = header(parts, TENANT_HEADER)?
            .ok_or_else(|| ApiError::bad_request(format!("{TENANT_HEADER} header is required")))?
            .to_owned();
        let actor = match header(parts, ACTOR_HEADER)? {
            Some(raw) => raw.parse::<Actor>().map_err(ApiError::BadRequest)?,
            None => Actor::Owner,
        };

        let engine = state.tenants.get_or_create(&tenant).map_err(ApiError::Tenant)?;
        let entitlements = engine.entitlements().await;

        Ok(Session {
            tenant,
            engine,
            actor,
            entitlements,
        })
    }
}
