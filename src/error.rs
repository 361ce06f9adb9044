use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::clip::CameraId;

/// Every failure the replay service can surface to a caller.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Match name is required and must be a plain directory name")]
    InvalidLabel,

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not currently recording")]
    NotRecording,

    #[error("Extraction failed for {camera}: {reason}")]
    ExtractionFailed { camera: CameraId, reason: String },

    #[error("Clip not found: {0}")]
    ClipNotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Requested range not satisfiable for {size} byte clip")]
    InvalidRange { size: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplayError {
    pub fn extraction(camera: &CameraId, reason: impl Into<String>) -> Self {
        ReplayError::ExtractionFailed {
            camera: camera.clone(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReplayError::InvalidLabel => "INVALID_LABEL",
            ReplayError::AlreadyRecording => "ALREADY_RECORDING",
            ReplayError::NotRecording => "NOT_RECORDING",
            ReplayError::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            ReplayError::ClipNotFound(_) => "CLIP_NOT_FOUND",
            ReplayError::UploadFailed(_) => "UPLOAD_FAILED",
            ReplayError::CaptureUnavailable(_) => "CAPTURE_UNAVAILABLE",
            ReplayError::InvalidRange { .. } => "INVALID_RANGE",
            ReplayError::Io(_) => "IO_ERROR",
        }
    }
}

/// JSON body returned for any failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ResponseError for ReplayError {
    fn status_code(&self) -> StatusCode {
        match self {
            ReplayError::InvalidLabel
            | ReplayError::AlreadyRecording
            | ReplayError::NotRecording => StatusCode::BAD_REQUEST,
            ReplayError::ClipNotFound(_) => StatusCode::NOT_FOUND,
            ReplayError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ReplayError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            ReplayError::CaptureUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReplayError::ExtractionFailed { .. } | ReplayError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let ReplayError::InvalidRange { size } = self {
            builder.insert_header(("Content-Range", format!("bytes */{}", size)));
        }
        builder.json(ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_violations_map_to_bad_request() {
        assert_eq!(ReplayError::AlreadyRecording.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ReplayError::NotRecording.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ReplayError::InvalidLabel.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn lookup_and_upload_failures_have_distinct_statuses() {
        assert_eq!(
            ReplayError::ClipNotFound("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ReplayError::UploadFailed("denied".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ReplayError::InvalidRange { size: 10 }.code(), "INVALID_RANGE");
    }

    #[test]
    fn extraction_message_names_the_camera() {
        let err = ReplayError::extraction(&CameraId::new("cam2"), "encoder exited with 1");
        assert_eq!(err.to_string(), "Extraction failed for cam2: encoder exited with 1");
    }
}
