//! Error types for tessera operations.
//!
//! Errors local to one zone or one adapter are absorbed by the components
//! that see them (`GeometryError`, `AdapterError`); errors between stages
//! surface through `TesseraError` and halt the document's run.

use std::time::Duration;
use thiserror::Error;

use crate::contract::Violation;

/// Result type alias for tessera operations.
pub type CoreResult<T> = Result<T, TesseraError>;

/// Result type returned by detector adapters.
pub type DetectResult<T> = Result<T, DetectError>;

/// Main error type for all tessera operations.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// A zone with unusable geometry reached the reconciliation engine.
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// A stage's output failed its declared contract.
    #[error("Contract violation in stage '{stage}': {violation}")]
    ContractViolation { stage: String, violation: Violation },

    /// A stage failed permanently, or kept failing transiently until the
    /// retry budget ran out.
    #[error("Fatal error in stage '{stage}': {message}")]
    StageFatal { stage: String, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Record sink operation failed.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Adapter (ADP_xxx)
    AdapterFailed,
    AdapterTimeout,
    AdapterPanicked,
    AdapterDisabled,

    // Geometry (GEO_xxx)
    GeoInvalidZone,

    // Contract (CTR_xxx)
    ContractViolation,

    // Stage (STG_xxx)
    StageFatal,

    // Configuration (CFG_xxx)
    CfgInvalid,

    // Storage (STO_xxx)
    StorageFailed,

    // IO / serialization
    Io,
    Serialization,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AdapterFailed => "ADP_001",
            ErrorCode::AdapterTimeout => "ADP_002",
            ErrorCode::AdapterPanicked => "ADP_003",
            ErrorCode::AdapterDisabled => "ADP_004",
            ErrorCode::GeoInvalidZone => "GEO_001",
            ErrorCode::ContractViolation => "CTR_001",
            ErrorCode::StageFatal => "STG_001",
            ErrorCode::CfgInvalid => "CFG_001",
            ErrorCode::StorageFailed => "STO_001",
            ErrorCode::Io => "IO_001",
            ErrorCode::Serialization => "SER_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl TesseraError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error wrapping its cause.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Geometry(_) => ErrorCode::GeoInvalidZone,
            Self::ContractViolation { .. } => ErrorCode::ContractViolation,
            Self::StageFatal { .. } => ErrorCode::StageFatal,
            Self::Configuration(_) => ErrorCode::CfgInvalid,
            Self::Storage { .. } => ErrorCode::StorageFailed,
            Self::Io(_) => ErrorCode::Io,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Geometry(_) => Some("The producing adapter emitted an invalid bounding box; fix the adapter rather than the zone"),
            Self::ContractViolation { .. } => Some("Inspect the named field in the failing stage's output"),
            Self::Configuration(_) => Some("Please check your tessera configuration file and TESSERA_* variables"),
            _ => None,
        }
    }
}

/// Errors raised by a detector adapter implementation.
#[derive(Error, Debug)]
pub enum DetectError {
    /// Detection ran but failed.
    #[error("Detection failed: {0}")]
    Failed(String),

    /// The page handle could not be used by this adapter.
    #[error("Invalid page input: {0}")]
    InvalidInput(String),

    /// IO error while reading detector input.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Detector output could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Why an adapter's contribution for a page was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// The adapter returned an error.
    Failed(String),
    /// The adapter exceeded its timeout.
    Timeout(Duration),
    /// The adapter task panicked.
    Panicked(String),
    /// The adapter timed out on an earlier page of the same document and is
    /// no longer called.
    Disabled,
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "failed: {}", msg),
            Self::Timeout(after) => write!(f, "timed out after {:?}", after),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
            Self::Disabled => write!(f, "skipped after an earlier timeout"),
        }
    }
}

/// A detector adapter failed for one page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("adapter '{adapter}' on page {page} {kind}")]
pub struct AdapterError {
    pub adapter: String,
    pub page: u32,
    pub kind: AdapterErrorKind,
}

impl AdapterError {
    /// Create an adapter error.
    pub fn new(adapter: impl Into<String>, page: u32, kind: AdapterErrorKind) -> Self {
        Self {
            adapter: adapter.into(),
            page,
            kind,
        }
    }

    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, AdapterErrorKind::Timeout(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self.kind {
            AdapterErrorKind::Failed(_) => ErrorCode::AdapterFailed,
            AdapterErrorKind::Timeout(_) => ErrorCode::AdapterTimeout,
            AdapterErrorKind::Panicked(_) => ErrorCode::AdapterPanicked,
            AdapterErrorKind::Disabled => ErrorCode::AdapterDisabled,
        }
    }
}

/// What is wrong with a zone's geometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZoneDefect {
    /// One or more bbox coordinates are NaN or infinite.
    #[error("bounding box has non-finite coordinates")]
    NonFinite,

    /// x0 >= x1 or y0 >= y1.
    #[error("bounding box is inverted or empty ({x0}, {y0}, {x1}, {y1})")]
    Inverted { x0: f64, y0: f64, x1: f64, y1: f64 },

    /// Confidence is not a finite value in [0, 1].
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// A zone rejected by the reconciliation engine.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("zone '{zone_id}' from adapter '{adapter}' on page {page}: {defect}")]
pub struct GeometryError {
    pub zone_id: String,
    pub page: u32,
    pub adapter: String,
    pub defect: ZoneDefect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_message() {
        let err = TesseraError::ContractViolation {
            stage: "bundling".to_string(),
            violation: Violation {
                record_index: Some(3),
                field: "citations".to_string(),
                reason: "required field is missing".to_string(),
            },
        };
        assert_eq!(err.code(), ErrorCode::ContractViolation);
        assert!(err.to_string().contains("citations"));
        assert!(err.to_string().contains("record 3"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_adapter_error_code() {
        let err = AdapterError::new("layout", 7, AdapterErrorKind::Timeout(Duration::from_secs(2)));
        assert_eq!(err.code(), ErrorCode::AdapterTimeout);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("page 7"));

        let skipped = AdapterError::new("layout", 8, AdapterErrorKind::Disabled);
        assert_eq!(skipped.code().as_str(), "ADP_004");
        assert!(!skipped.is_timeout());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ContractViolation.as_str(), "CTR_001");
        assert_eq!(ErrorCode::GeoInvalidZone.as_str(), "GEO_001");
    }
}
