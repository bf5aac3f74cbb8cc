use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::application::error::{ErrorReport, HttpError};

use super::HttpState;

const PUBLISH_CONFIRMATION: &str = "Data published successfully";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

pub(super) async fn publish_data(
    State(state): State<HttpState>,
    body: Body,
) -> Result<&'static str, HttpError> {
    let payload = to_bytes(body, state.max_body_bytes).await.map_err(|err| {
        HttpError::from_error(
            "infra::http::publish_data",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error reading request body",
            &err,
        )
    })?;

    state.ingest.ingest(payload).await?;
    Ok(PUBLISH_CONFIRMATION)
}

pub(super) async fn retrieve_data(State(state): State<HttpState>) -> Result<Response, HttpError> {
    let value = state.retrieve.latest().await?;
    Ok(cached_value_response(value))
}

pub(super) async fn relay_health(State(state): State<HttpState>) -> Response {
    let current = *state.relay_state.borrow();
    if current.is_live() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let mut response = (StatusCode::SERVICE_UNAVAILABLE, current.as_str()).into_response();
    ErrorReport::from_message(
        "infra::http::relay_health",
        StatusCode::SERVICE_UNAVAILABLE,
        format!("relay is {current}"),
    )
    .attach(&mut response);
    response
}

fn cached_value_response(value: Bytes) -> Response {
    let content_type = if std::str::from_utf8(&value).is_ok() {
        TEXT_PLAIN
    } else {
        OCTET_STREAM
    };

    let mut response = (StatusCode::OK, value).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
