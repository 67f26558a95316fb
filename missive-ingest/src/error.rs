use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors starting or running the ingestion server.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Failed to bind to the specified address.
    #[error("Failed to bind ingestion server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// The server stopped with an error.
    #[error("Ingestion server error: {0}")]
    Server(String),
}

/// Why a request to `/queue` was turned away before any email was looked at.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Unsupported Media Type")]
    UnsupportedMediaType,

    #[error("Payload Too Large")]
    PayloadTooLarge,

    #[error("Unauthorized")]
    Unauthorized,

    /// The body claimed to be gzip but could not be inflated.
    #[error("Bad Request")]
    BadEncoding,

    #[error("Invalid Form Body")]
    InvalidBody,
}

impl RequestError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadEncoding => StatusCode::BAD_REQUEST,
            Self::InvalidBody => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
