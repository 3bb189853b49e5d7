//! Stable machine-readable codes for failures that stop a job before any
//! frame is processed.

use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
pub const UNSUPPORTED_FILE_TYPE: &str = "UNSUPPORTED_FILE_TYPE";
pub const FFMPEG_NOT_FOUND: &str = "FFMPEG_NOT_FOUND";
pub const DECODER_OPEN_FAILED: &str = "DECODER_OPEN_FAILED";
pub const ENCODER_INIT_FAILED: &str = "ENCODER_INIT_FAILED";
pub const FONT_LOAD_FAILED: &str = "FONT_LOAD_FAILED";
pub const CONVERTER_INIT_FAILED: &str = "CONVERTER_INIT_FAILED";
pub const RENDERER_INIT_FAILED: &str = "RENDERER_INIT_FAILED";

/// Process exit status for a coded startup failure.
pub const EXIT_STARTUP_FAILURE: i32 = 2;
/// Process exit status for anything else.
pub const EXIT_FAILURE: i32 = 1;

/// Whether the caller can fix the failure by changing arguments (`usage`) or
/// has to fix the machine (`environment`). Uncoded failures are `internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodedErrorKind {
    Usage,
    Environment,
    Internal,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    /// Missing tools or unreadable inputs rather than bad arguments.
    pub fn environment(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Environment,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: self.kind,
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub kind: CodedErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any error; uncoded failures are reported as `INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                kind: CodedErrorKind::Internal,
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}

pub fn exit_code_for(error: &Error) -> i32 {
    if find_coded_error(error).is_some() {
        EXIT_STARTUP_FAILURE
    } else {
        EXIT_FAILURE
    }
}
