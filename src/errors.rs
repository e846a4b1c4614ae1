//! Engine error taxonomy
//!
//! Error codes:
//! - AGG_INVALID_STAGE_SPEC (REJECT)
//! - AGG_INVALID_INDEX_SPEC (REJECT)
//! - AGG_INVALID_CONFIG (REJECT)
//! - AGG_INDEX_NOT_FOUND (REJECT)
//! - AGG_GEO_INDEX_REQUIRED (REJECT)
//! - AGG_TEXT_INDEX_REQUIRED (REJECT)
//! - AGG_TEXT_INDEX_LIMIT_EXCEEDED (REJECT)
//! - AGG_TYPE_MISMATCH (DOCUMENT)
//! - AGG_DIVIDE_BY_ZERO (DOCUMENT)
//! - AGG_CONVERSION_FAILED (DOCUMENT)
//! - AGG_ARITHMETIC_OVERFLOW (DOCUMENT)
//! - AGG_INDEX_CONFLICT (ERROR)
//! - AGG_PARALLEL_ARRAYS (ERROR)
//! - AGG_RESOURCE_EXCEEDED (ERROR)
//! - AGG_BUCKET_OUT_OF_RANGE (ERROR)
//! - AGG_CODEC_ERROR (ERROR)
//!
//! REJECT errors are raised while a pipeline, index or configuration is
//! being constructed; no document has flowed yet. DOCUMENT errors are
//! raised while evaluating a single document and may be skipped when the
//! engine runs with `error_mode = "skip"`. ERROR aborts the operation.

use std::fmt;

use crate::value::codec::CodecError;

/// Severity levels for engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Structural problem detected before execution
    Reject,
    /// Failure scoped to a single document
    Document,
    /// Operation aborted
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Reject => "REJECT",
            Severity::Document => "DOCUMENT",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed stage descriptor or operator arguments
    InvalidStageSpec,
    /// Malformed index key pattern or options
    InvalidIndexSpec,
    /// Configuration failed to load or validate
    InvalidConfig,
    /// Operand of the wrong type for an operator
    TypeMismatch,
    /// Division or modulo by zero
    DivideByZero,
    /// `$convert` could not convert its input
    ConversionFailed,
    /// Decimal arithmetic left the representable range
    ArithmeticOverflow,
    /// Unique index already holds the key
    IndexConflict,
    /// Compound index over two array fields of one document
    ParallelArrays,
    /// Named index does not exist
    IndexNotFound,
    /// `$geoNear` without a usable 2dsphere index
    GeoIndexRequired,
    /// `$text` without a text index
    TextIndexRequired,
    /// Blocking stage exceeded its memory ceiling
    ResourceExceeded,
    /// Collection already has a text index
    TextIndexLimitExceeded,
    /// `$bucket` value outside the boundaries with no default bucket
    BucketOutOfRange,
    /// Document encoding or decoding failed
    Codec,
}

impl ErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::InvalidStageSpec => "AGG_INVALID_STAGE_SPEC",
            ErrorCode::InvalidIndexSpec => "AGG_INVALID_INDEX_SPEC",
            ErrorCode::InvalidConfig => "AGG_INVALID_CONFIG",
            ErrorCode::TypeMismatch => "AGG_TYPE_MISMATCH",
            ErrorCode::DivideByZero => "AGG_DIVIDE_BY_ZERO",
            ErrorCode::ConversionFailed => "AGG_CONVERSION_FAILED",
            ErrorCode::ArithmeticOverflow => "AGG_ARITHMETIC_OVERFLOW",
            ErrorCode::IndexConflict => "AGG_INDEX_CONFLICT",
            ErrorCode::ParallelArrays => "AGG_PARALLEL_ARRAYS",
            ErrorCode::IndexNotFound => "AGG_INDEX_NOT_FOUND",
            ErrorCode::GeoIndexRequired => "AGG_GEO_INDEX_REQUIRED",
            ErrorCode::TextIndexRequired => "AGG_TEXT_INDEX_REQUIRED",
            ErrorCode::ResourceExceeded => "AGG_RESOURCE_EXCEEDED",
            ErrorCode::TextIndexLimitExceeded => "AGG_TEXT_INDEX_LIMIT_EXCEEDED",
            ErrorCode::BucketOutOfRange => "AGG_BUCKET_OUT_OF_RANGE",
            ErrorCode::Codec => "AGG_CODEC_ERROR",
        }
    }

    /// Returns the severity level for this code
    pub fn severity(&self) -> Severity {
        match self {
            ErrorCode::InvalidStageSpec
            | ErrorCode::InvalidIndexSpec
            | ErrorCode::InvalidConfig
            | ErrorCode::IndexNotFound
            | ErrorCode::GeoIndexRequired
            | ErrorCode::TextIndexRequired
            | ErrorCode::TextIndexLimitExceeded => Severity::Reject,
            ErrorCode::TypeMismatch
            | ErrorCode::DivideByZero
            | ErrorCode::ConversionFailed
            | ErrorCode::ArithmeticOverflow => Severity::Document,
            ErrorCode::IndexConflict
            | ErrorCode::ParallelArrays
            | ErrorCode::ResourceExceeded
            | ErrorCode::BucketOutOfRange
            | ErrorCode::Codec => Severity::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Engine error with code and context
#[derive(Debug, Clone, PartialEq)]
pub struct AggError {
    code: ErrorCode,
    message: String,
}

impl AggError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_stage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidStageSpec, message)
    }

    pub fn invalid_index(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidIndexSpec, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeMismatch, message)
    }

    pub fn divide_by_zero(operator: &str) -> Self {
        Self::new(
            ErrorCode::DivideByZero,
            format!("{} cannot divide by zero", operator),
        )
    }

    pub fn conversion_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConversionFailed, message)
    }

    pub fn overflow(operator: &str) -> Self {
        Self::new(
            ErrorCode::ArithmeticOverflow,
            format!("{} overflowed the decimal range", operator),
        )
    }

    pub fn index_conflict(index: &str, key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::IndexConflict,
            format!("duplicate key in unique index '{}': {}", index, key),
        )
    }

    pub fn parallel_arrays(index: &str) -> Self {
        Self::new(
            ErrorCode::ParallelArrays,
            format!(
                "cannot index parallel arrays: more than one field of index '{}' is an array",
                index
            ),
        )
    }

    pub fn index_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::IndexNotFound,
            format!("index '{}' not found", name),
        )
    }

    pub fn geo_index_required(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GeoIndexRequired, message)
    }

    pub fn text_index_required() -> Self {
        Self::new(
            ErrorCode::TextIndexRequired,
            "$text requires a text index on the collection",
        )
    }

    pub fn text_index_limit(existing: &str) -> Self {
        Self::new(
            ErrorCode::TextIndexLimitExceeded,
            format!(
                "collection already has text index '{}'; only one text index is allowed",
                existing
            ),
        )
    }

    pub fn resource_exceeded(stage: &str, limit: u64) -> Self {
        Self::new(
            ErrorCode::ResourceExceeded,
            format!(
                "{} exceeded its memory limit of {} bytes; spilling to disk is not supported",
                stage, limit
            ),
        )
    }

    pub fn bucket_out_of_range(value: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BucketOutOfRange,
            format!(
                "$bucket value {} is outside the boundaries and no default bucket is configured",
                value
            ),
        )
    }

    /// Returns the error code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether the error is scoped to a single document
    pub fn is_per_document(&self) -> bool {
        self.severity() == Severity::Document
    }

    /// Returns whether the error was raised before execution
    pub fn is_structural(&self) -> bool {
        self.severity() == Severity::Reject
    }

    /// Prefixes the message with the operator or stage that raised it
    pub fn context(mut self, context: &str) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }
}

impl fmt::Display for AggError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for AggError {}

impl From<CodecError> for AggError {
    fn from(err: CodecError) -> Self {
        AggError::new(ErrorCode::Codec, err.to_string())
    }
}

/// Result type for engine operations
pub type AggResult<T> = Result<T, AggError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::TypeMismatch.code(), "AGG_TYPE_MISMATCH");
        assert_eq!(ErrorCode::BucketOutOfRange.code(), "AGG_BUCKET_OUT_OF_RANGE");
        assert_eq!(
            ErrorCode::TextIndexLimitExceeded.code(),
            "AGG_TEXT_INDEX_LIMIT_EXCEEDED"
        );
    }

    #[test]
    fn test_per_document_errors() {
        assert!(AggError::type_mismatch("x").is_per_document());
        assert!(AggError::divide_by_zero("$divide").is_per_document());
        assert!(AggError::conversion_failed("x").is_per_document());
        assert!(!AggError::invalid_stage("x").is_per_document());
        assert!(!AggError::resource_exceeded("$sort", 10).is_per_document());
    }

    #[test]
    fn test_structural_errors() {
        assert!(AggError::invalid_stage("x").is_structural());
        assert!(AggError::text_index_required().is_structural());
        assert!(!AggError::index_conflict("email_1", "\"a\"").is_structural());
    }

    #[test]
    fn test_error_display() {
        let err = AggError::divide_by_zero("$divide");
        let display = format!("{}", err);
        assert!(display.contains("[DOCUMENT]"));
        assert!(display.contains("AGG_DIVIDE_BY_ZERO"));
        assert!(display.contains("$divide"));
    }

    #[test]
    fn test_context_prefix() {
        let err = AggError::type_mismatch("expected a string").context("$concat");
        assert_eq!(err.message(), "$concat: expected a string");
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }
}
