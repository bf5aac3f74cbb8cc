use std::{borrow::Cow, error::Error as StdError};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{ingest::IngestError, relay::RelayError, retrieve::RetrieveError},
    config::LoadError,
    infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// An error response: a status, the body the caller sees and the report the logs see.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: Cow<'static, str>,
    report: ErrorReport,
}

impl HttpError {
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message: public_message.into(),
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn public_message(&self) -> &str {
        &self.public_message
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<IngestError> for HttpError {
    fn from(error: IngestError) -> Self {
        HttpError::from_error(
            "application::ingest",
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to publish message: {error}"),
            &error,
        )
    }
}

impl From<RetrieveError> for HttpError {
    fn from(error: RetrieveError) -> Self {
        let public_message = match &error {
            RetrieveError::Empty { .. } => "Failed to retrieve data: no value cached yet".into(),
            RetrieveError::Cache(err) => format!("Failed to retrieve data: {err}"),
        };
        HttpError::from_error(
            "application::retrieve",
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

/// Top-level failure of the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("relay terminated: {0}")]
    Relay(#[from] RelayError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{CacheError, PublishError};

    #[test]
    fn publish_failure_embeds_the_broker_message() {
        let err = HttpError::from(IngestError::from(PublishError::Unavailable(
            "all brokers down".to_string(),
        )));

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.public_message().starts_with("Failed to publish message"));
        assert!(err.public_message().contains("all brokers down"));
    }

    #[test]
    fn absent_key_and_cache_outage_share_status_but_not_text() {
        let empty = HttpError::from(RetrieveError::Empty {
            key: "latest".to_string(),
        });
        let outage = HttpError::from(RetrieveError::Cache(CacheError::unavailable(
            "connection refused",
        )));

        assert_eq!(empty.status(), outage.status());
        assert_ne!(empty.public_message(), outage.public_message());
        assert!(outage.public_message().contains("connection refused"));
    }

    #[test]
    fn report_walks_the_source_chain() {
        let err = IngestError::from(PublishError::rejected("ingest", "message too large"));
        let report = ErrorReport::from_error("test", StatusCode::INTERNAL_SERVER_ERROR, &err);

        assert!(!report.messages.is_empty());
        assert!(report.messages[0].contains("message too large"));
    }
}
