//! Byte buffers shared between the stage and the caller.
//!
//! [`WriteBuf`] is the growable scratch buffer the active stage
//! serializes outgoing PDUs into; clearing it retains capacity so a
//! long-lived session stops allocating once it has seen its largest
//! message. [`BytesSlice`] is a fixed-capacity view with exact-fill
//! semantics, used to hand pixel or payload regions across the
//! boundary without partial writes.

use bytes::{Bytes, BytesMut};

use crate::error::VrdError;

/// Hard ceiling on [`WriteBuf`] growth.
///
/// A malicious peer must not be able to drive unbounded allocation by
/// provoking ever-larger responses.
pub const MAX_WRITE_BUF_SIZE: usize = 16 * 1024 * 1024;

// ── WriteBuf ─────────────────────────────────────────────────────

/// An owned, growable byte store for serializing outgoing messages.
///
/// Backed by [`BytesMut`]: `clear` resets the logical length without
/// freeing capacity, and growth is geometric. Every append is checked
/// against [`MAX_WRITE_BUF_SIZE`].
#[derive(Debug, Default)]
pub struct WriteBuf {
    inner: BytesMut,
}

impl WriteBuf {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            inner: BytesMut::new(),
        }
    }

    /// Create a buffer with `capacity` bytes pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity.min(MAX_WRITE_BUF_SIZE)),
        }
    }

    /// Logical length — the number of previously-written bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the buffer holds no written bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Reset the logical length to zero, keeping allocated capacity.
    ///
    /// Calling this twice in a row is equivalent to calling it once.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Append `src`, growing capacity as needed.
    ///
    /// Fails with [`VrdError::CapacityExceeded`] when the resulting
    /// length would pass [`MAX_WRITE_BUF_SIZE`]; the buffer is left
    /// unchanged in that case.
    pub fn append(&mut self, src: &[u8]) -> Result<(), VrdError> {
        let requested = self.inner.len() + src.len();
        if requested > MAX_WRITE_BUF_SIZE {
            return Err(VrdError::CapacityExceeded {
                requested,
                ceiling: MAX_WRITE_BUF_SIZE,
            });
        }
        self.inner.extend_from_slice(src);
        Ok(())
    }

    /// Copy the written contents into `dest`.
    ///
    /// `dest` must be exactly [`len`](Self::len) bytes long; anything
    /// else fails with [`VrdError::LengthMismatch`] and copies nothing.
    pub fn read_into(&self, dest: &mut [u8]) -> Result<(), VrdError> {
        if dest.len() != self.inner.len() {
            return Err(VrdError::LengthMismatch {
                expected: self.inner.len(),
                actual: dest.len(),
            });
        }
        dest.copy_from_slice(&self.inner);
        Ok(())
    }

    /// The written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Detach the written bytes as an immutable [`Bytes`], leaving the
    /// buffer empty but with its spare capacity intact.
    pub fn take_bytes(&mut self) -> Bytes {
        self.inner.split().freeze()
    }
}

// ── BytesSlice ───────────────────────────────────────────────────

/// A view over exactly `size` bytes with all-or-nothing fill semantics.
///
/// `fill` refuses length mismatches outright rather than copying a
/// prefix, so a failed call can never leave stale bytes mixed with
/// fresh ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesSlice {
    data: Box<[u8]>,
}

impl BytesSlice {
    /// Create a zero-initialised view of `size` bytes.
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Take ownership of an existing byte vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// The fixed capacity of the view.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Overwrite the entire view with `bytes`.
    ///
    /// Fails with [`VrdError::LengthMismatch`] if `bytes.len()` differs
    /// from [`size`](Self::size); the view is unchanged on failure.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<(), VrdError> {
        if bytes.len() != self.data.len() {
            return Err(VrdError::LengthMismatch {
                expected: self.data.len(),
                actual: bytes.len(),
            });
        }
        self.data.copy_from_slice(bytes);
        Ok(())
    }

    /// The current contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

// ── Tests ────────────────────────────────────────────────────────
