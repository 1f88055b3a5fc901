use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::Error;
use crate::rosetta::ErrorObject;

/// Error surface of the Rosetta handlers. Every variant renders as a
/// Rosetta error object; internal details are redacted from responses and
/// logged instead.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("upstream node unavailable: {0}")]
    Unavailable(String),

    #[error("unable to find requested data")]
    NotFound,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request names an unknown network")]
    WrongNetwork,

    #[error("previous block required")]
    NeedsPreviousBlock,

    #[error("signature count does not match input count")]
    IncorrectSigCount,

    #[error("unsupported signature type")]
    UnsupportedSignatureType,

    #[error("unsupported curve type")]
    UnsupportedCurveType,
}

impl ServeError {
    pub fn malformed(msg: impl ToString) -> Self {
        ServeError::MalformedRequest(msg.to_string())
    }

    fn code(&self) -> i32 {
        match self {
            ServeError::Internal(_) => 1,
            ServeError::Unavailable(_) => 2,
            ServeError::NotFound => 3,
            ServeError::MalformedRequest(_) => 4,
            ServeError::WrongNetwork => 5,
            ServeError::NeedsPreviousBlock => 6,
            ServeError::IncorrectSigCount => 7,
            ServeError::UnsupportedSignatureType => 8,
            ServeError::UnsupportedCurveType => 9,
        }
    }

    fn retriable(&self) -> bool {
        matches!(self, ServeError::Unavailable(_))
    }

    /// Public message. Internal errors are redacted.
    fn public_message(&self) -> String {
        match self {
            ServeError::Internal(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }

    pub fn error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.public_message(),
            retriable: self.retriable(),
            details: None,
        }
    }
}

/// The catalogue served in `/network/options`.
pub fn all_errors() -> Vec<ErrorObject> {
    [
        ServeError::Internal(String::new()),
        ServeError::Unavailable(String::new()),
        ServeError::NotFound,
        ServeError::MalformedRequest(String::new()),
        ServeError::WrongNetwork,
        ServeError::NeedsPreviousBlock,
        ServeError::IncorrectSigCount,
        ServeError::UnsupportedSignatureType,
        ServeError::UnsupportedCurveType,
    ]
    .iter()
    .map(ServeError::error_object)
    .collect()
}

impl From<Error> for ServeError {
    fn from(err: Error) -> Self {
        match err {
            Error::DcrdUnconnected | Error::DcrdUnsuitable(_) => {
                ServeError::Unavailable(err.to_string())
            }
            Error::NeedsPreviousBlock => ServeError::NeedsPreviousBlock,
            Error::IncorrectSigCount => ServeError::IncorrectSigCount,
            Error::UnsupportedSignatureType(_) => ServeError::UnsupportedSignatureType,
            Error::UnsupportedCurveType(_) => ServeError::UnsupportedCurveType,
            Error::ScriptDecodeError(msg) => ServeError::MalformedRequest(msg),
            Error::Wire(msg) => ServeError::MalformedRequest(msg),
            Error::Rpc(msg) => {
                // dcrd answers lookups of unknown hashes with rpc error -5.
                if msg.contains("(-5)") {
                    ServeError::NotFound
                } else {
                    ServeError::Internal(msg)
                }
            }
            other => ServeError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = match self {
            ServeError::MalformedRequest(_) | ServeError::WrongNetwork => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let ServeError::Internal(detail) = &self {
            error!("internal server error: {detail}");
        }

        (status, Json(json!(self.error_object()))).into_response()
    }
}
