//! The user-facing JSON web server that listens for detection requests

use actix_web::error::BlockingError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use anyhow::anyhow;
use std::collections::HashMap;

mod protocol;
pub mod routes;

/// An error that ends a request early. Rendered as `{"error": "<message>"}`
#[derive(Debug)]
pub struct WebError {
    err: anyhow::Error,
    status: StatusCode,
}

impl WebError {
    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        WebError {
            err: anyhow!("{message}"),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let err = HashMap::from([("error", self.to_string())]);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(err)
    }

    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError {
            err,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for WebError {
    fn from(err: serde_json::Error) -> Self {
        WebError::from(anyhow!(err))
    }
}

impl From<BlockingError> for WebError {
    fn from(err: BlockingError) -> Self {
        WebError::from(anyhow!("image processing was interrupted: {err}"))
    }
}
