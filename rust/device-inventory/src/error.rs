/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Error types for the inventory service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::SourcePollResponse;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Validation failures raised by store mutations. None of these leave the
/// store partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("primary identity id is required")]
    InvalidPrimaryIdentity,

    #[error("no secondary identity ids supplied")]
    NoSecondaryIdentities,

    #[error("primary identity not found")]
    PrimaryIdentityNotFound,

    #[error("device_id is required")]
    MissingDeviceIdentifier,

    #[error("type is required")]
    MissingEventType,

    #[error("incident not found")]
    IncidentNotFound,
}

impl StoreError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidPrimaryIdentity => "invalid_primary_id",
            StoreError::NoSecondaryIdentities => "no_secondary_ids",
            StoreError::PrimaryIdentityNotFound => "primary_identity_not_found",
            StoreError::MissingDeviceIdentifier => "missing_device_id",
            StoreError::MissingEventType => "missing_type",
            StoreError::IncidentNotFound => "not_found",
        }
    }
}

/// Failures fetching or decoding the remote device inventory.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("malformed source payload: {0}")]
    MalformedPayload(String),

    #[error("source response had no devices")]
    EmptyPayload,

    #[error("poll cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A failed poll together with the best-effort response describing it.
#[derive(Debug, Error)]
#[error("{source_name} poll failed: {error}")]
pub struct PollError {
    pub source_name: String,
    pub response: SourcePollResponse,
    #[source]
    pub error: SourceError,
}

/// Snapshot load/save failures.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_body"),
            ServiceError::Store(StoreError::PrimaryIdentityNotFound)
            | ServiceError::Store(StoreError::IncidentNotFound) => {
                (StatusCode::NOT_FOUND, self.store_code())
            }
            ServiceError::Store(_) => (StatusCode::BAD_REQUEST, self.store_code()),
            ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if matches!(self, ServiceError::Internal(_)) {
            error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            code: code.to_string(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl ServiceError {
    fn store_code(&self) -> &'static str {
        match self {
            ServiceError::Store(err) => err.code(),
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_error_kinds_have_distinct_codes() {
        let codes = [
            StoreError::InvalidPrimaryIdentity.code(),
            StoreError::NoSecondaryIdentities.code(),
            StoreError::PrimaryIdentityNotFound.code(),
        ];
        assert_ne!(codes[0], codes[1]);
        assert_ne!(codes[1], codes[2]);
        assert_ne!(codes[0], codes[2]);
    }

    #[test]
    fn unknown_primary_maps_to_not_found() {
        let response = ServiceError::from(StoreError::PrimaryIdentityNotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ServiceError::from(StoreError::MissingDeviceIdentifier).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
