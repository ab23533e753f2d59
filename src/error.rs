use crate::response::Status;
use serde::{Deserialize, Serialize};
use serde_json;
use std::error;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Source file extension is not one we can ingest
    UnsupportedFormat,
    /// Source file could not be parsed
    MalformedInput,
    /// Detection was cancelled before it finished
    ConcurrencyAborted,
    BadRequest,
    Internal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceError {
    pub msg: String,
    pub status: Status,
    pub kind: ErrorKind,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json)
    }
}

impl error::Error for ServiceError {}

impl ServiceError {
    pub fn bad_request<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::BadRequest,
            kind: ErrorKind::BadRequest,
        }
    }

    pub fn internal_server_error<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::InternalServerError,
            kind: ErrorKind::Internal,
        }
    }

    pub fn unsupported_format<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::BadRequest,
            kind: ErrorKind::UnsupportedFormat,
        }
    }

    pub fn malformed_input<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::BadRequest,
            kind: ErrorKind::MalformedInput,
        }
    }

    pub fn aborted<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::GatewayTimeout,
            kind: ErrorKind::ConcurrencyAborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_json() {
        let err = ServiceError::unsupported_format("Unsupported file format");
        let rendered = err.to_string();
        assert!(rendered.contains("\"msg\": \"Unsupported file format\""));
        assert!(rendered.contains("\"status\": 400"));
        assert!(rendered.contains("\"kind\": \"unsupportedFormat\""));
    }

    #[test]
    fn aborted_maps_to_gateway_timeout() {
        let err = ServiceError::aborted("cancelled");
        assert_eq!(err.kind, ErrorKind::ConcurrencyAborted);
        assert!(matches!(err.status, Status::GatewayTimeout));
    }
}
