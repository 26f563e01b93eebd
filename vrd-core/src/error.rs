//! Domain-specific error types for the VRD session core.
//!
//! All fallible operations return `Result<T, VrdError>`.
//! No panics on invalid input — every error is typed and recoverable.
//! A peer-initiated termination is *not* an error: it surfaces as an
//! [`OutputItem::Terminate`](crate::stage::OutputItem::Terminate) output.

use thiserror::Error;

/// The canonical error type for the VRD session core.
#[derive(Debug, Error)]
pub enum VrdError {
    // ── Lifecycle Errors ─────────────────────────────────────────
    /// An operation was invoked on a resource that was already torn
    /// down (or on a stale boundary handle).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The negotiated session handed to `ActiveStage::new` is missing
    /// something the active stage cannot run without.
    #[error("invalid session state: {0}")]
    InvalidSessionState(&'static str),

    // ── Decode Errors ────────────────────────────────────────────
    /// A payload could not be parsed: truncated, malformed, or a
    /// declared length exceeding the remaining bytes.
    #[error("decode error: {context} (needed {needed}, had {remaining})")]
    Truncated {
        context: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A field in a PDU header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// Received bytes that do not start with the VRD magic sequence.
    #[error("invalid magic bytes: expected VRD1")]
    InvalidMagic,

    /// The PDU body failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// Decompression of flagged bitmap data failed, or the
    /// decompressed size did not match the rectangle geometry.
    #[error("bitmap decompression failed: {0}")]
    Decompression(String),

    /// A decoded rectangle falls outside the negotiated desktop bounds.
    #[error("rectangle out of bounds: ({x},{y}) {width}x{height} on {max_width}x{max_height}")]
    RectOutOfBounds {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        max_width: u16,
        max_height: u16,
    },

    // ── Buffer Errors ────────────────────────────────────────────
    /// A write would grow a buffer past its hard ceiling.
    #[error("capacity exceeded: {requested} bytes (ceiling {ceiling})")]
    CapacityExceeded { requested: usize, ceiling: usize },

    /// Caller-supplied data does not match an expected fixed size.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a structured payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl VrdError {
    /// Classifies this error as a decode failure of the incoming
    /// payload (as opposed to a lifecycle or buffer fault).
    ///
    /// The caller typically drops the connection on decode errors and
    /// treats the rest as bugs.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            VrdError::Truncated { .. }
                | VrdError::InvalidHeader(_)
                | VrdError::InvalidMagic
                | VrdError::ChecksumMismatch
                | VrdError::UnknownVariant { .. }
                | VrdError::Decompression(_)
                | VrdError::RectOutOfBounds { .. }
        )
    }
}

impl From<Box<bincode::ErrorKind>> for VrdError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        VrdError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = VrdError::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = VrdError::CapacityExceeded {
            requested: 1000,
            ceiling: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = VrdError::Truncated {
            context: "bitmap rect",
            needed: 400,
            remaining: 10,
        };
        assert!(e.to_string().contains("bitmap rect"));
    }

    #[test]
    fn decode_error_classification() {
        assert!(VrdError::ChecksumMismatch.is_decode_error());
        assert!(
            VrdError::Truncated {
                context: "hdr",
                needed: 16,
                remaining: 3
            }
            .is_decode_error()
        );
        assert!(!VrdError::InvalidState("torn down").is_decode_error());
        assert!(
            !VrdError::LengthMismatch {
                expected: 4,
                actual: 2
            }
            .is_decode_error()
        );
    }

    #[test]
    fn from_bincode() {
        let err = bincode::deserialize::<String>(&[0xFF]).unwrap_err();
        let e: VrdError = err.into();
        assert!(matches!(e, VrdError::Encoding(_)));
    }
}
