use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallError>;

/// Errors raised while reading or writing the binary call header.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("truncated header: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("invalid length {len} for wire type {wire_type}")]
    InvalidLength { wire_type: u8, len: i32 },

    #[error("invalid utf-8 in string field {field_id}")]
    InvalidString { field_id: i16 },

    #[error("unsupported wire type: {0}")]
    UnsupportedWireType(u8),
}

/// Call-level failures visible to the call originator.
///
/// Registry and routing problems are contained in their own layers and
/// never surface here; only header validation and filter aborts do.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("required header field missing: {0}")]
    RequiredFieldMissing(&'static str),

    #[error("header codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("filter {filter} aborted the call: {message}")]
    FilterAborted {
        filter: &'static str,
        message: String,
    },

    #[error("health report serialization failed: {0}")]
    HealthReport(#[from] serde_json::Error),
}
