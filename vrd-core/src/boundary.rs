//! Boundary layer for embedders holding opaque handles.
//!
//! Callers that cannot hold Rust references (an event loop written in
//! another language, a scripting layer) register resources in a
//! [`Boundary`] and address them through generation-checked
//! [`Handle`]s. A destroyed or recycled handle is *detected* — every
//! use reports "object already disposed" instead of touching freed
//! state. Destroying an already-destroyed resource is a no-op.

use crate::buffer::{BytesSlice, WriteBuf};
use crate::error::VrdError;
use crate::image::{DecodedImage, PixelFormat, Rect};
use crate::session::NegotiatedSession;
use crate::stage::{Action, ActiveStage, OutputSequence};

// ── Handle / Arena ───────────────────────────────────────────────

/// An opaque, copyable reference to one resource in an [`Arena`].
///
/// The generation counter makes stale handles detectable: removing a
/// resource bumps its slot's generation, so handles minted before the
/// removal can never match again, even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generational arena of live instances.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Register a resource and mint its handle.
    pub fn insert(&mut self, value: T) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
    }

    /// Whether `handle` still refers to a live resource.
    pub fn is_live(&self, handle: Handle) -> bool {
        self.slot(handle).is_some_and(|s| s.value.is_some())
    }

    /// Borrow the resource, faulting on stale handles.
    pub fn get(&self, handle: Handle) -> Result<&T, VrdError> {
        self.slot(handle)
            .and_then(|s| s.value.as_ref())
            .ok_or(VrdError::InvalidState("object already disposed"))
    }

    /// Mutably borrow the resource, faulting on stale handles.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T, VrdError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_mut())
            .ok_or(VrdError::InvalidState("object already disposed"))
    }

    /// Remove the resource. Returns `None` (harmlessly) when the
    /// handle is already stale.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(value)
    }
}

// ── Boundary ─────────────────────────────────────────────────────

/// Registry implementing the embedder-facing contract: sessions,
/// images, write buffers, and byte views addressed by handle.
#[derive(Debug, Default)]
pub struct Boundary {
    stages: Arena<ActiveStage>,
    images: Arena<DecodedImage>,
    writebufs: Arena<WriteBuf>,
    slices: Arena<BytesSlice>,
}

impl Boundary {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sessions ─────────────────────────────────────────────────

    /// Build an active stage from a negotiated session and register it.
    pub fn create_session(&mut self, session: NegotiatedSession) -> Result<Handle, VrdError> {
        let stage = ActiveStage::new(session)?;
        Ok(self.stages.insert(stage))
    }

    /// Run one processing step on a registered session and image.
    pub fn process(
        &mut self,
        session: Handle,
        image: Handle,
        action: Action,
        payload: &[u8],
    ) -> Result<OutputSequence, VrdError> {
        let stage = self.stages.get_mut(session)?;
        let image = self.images.get_mut(image)?;
        stage.process(image, action, payload)
    }

    /// Tear down and unregister a session. No-op for stale handles.
    pub fn destroy_session(&mut self, session: Handle) {
        if let Some(mut stage) = self.stages.remove(session) {
            stage.teardown();
        }
    }

    // ── Images ───────────────────────────────────────────────────

    pub fn create_image(
        &mut self,
        width: u16,
        height: u16,
        format: PixelFormat,
    ) -> Handle {
        self.images.insert(DecodedImage::new(width, height, format))
    }

    pub fn image_pixels(&self, image: Handle) -> Result<&[u8], VrdError> {
        Ok(self.images.get(image)?.pixels())
    }

    /// Take the dirty rectangles accumulated on a registered image.
    pub fn image_drain_dirty(&mut self, image: Handle) -> Result<Vec<Rect>, VrdError> {
        Ok(self.images.get_mut(image)?.drain_dirty())
    }

    pub fn destroy_image(&mut self, image: Handle) {
        self.images.remove(image);
    }

    // ── Write buffers ────────────────────────────────────────────

    pub fn writebuf_new(&mut self) -> Handle {
        self.writebufs.insert(WriteBuf::new())
    }

    pub fn writebuf_clear(&mut self, buf: Handle) -> Result<(), VrdError> {
        self.writebufs.get_mut(buf)?.clear();
        Ok(())
    }

    pub fn writebuf_append(&mut self, buf: Handle, src: &[u8]) -> Result<(), VrdError> {
        self.writebufs.get_mut(buf)?.append(src)
    }

    pub fn writebuf_len(&self, buf: Handle) -> Result<usize, VrdError> {
        Ok(self.writebufs.get(buf)?.len())
    }

    pub fn writebuf_read_into(&self, buf: Handle, dest: &mut [u8]) -> Result<(), VrdError> {
        self.writebufs.get(buf)?.read_into(dest)
    }

    pub fn writebuf_destroy(&mut self, buf: Handle) {
        self.writebufs.remove(buf);
    }

    // ── Byte views ───────────────────────────────────────────────

    pub fn bytesslice_new(&mut self, size: usize) -> Handle {
        self.slices.insert(BytesSlice::zeroed(size))
    }

    pub fn bytesslice_size(&self, slice: Handle) -> Result<usize, VrdError> {
        Ok(self.slices.get(slice)?.size())
    }

    pub fn bytesslice_fill(&mut self, slice: Handle, src: &[u8]) -> Result<(), VrdError> {
        self.slices.get_mut(slice)?.fill(src)
    }

    pub fn bytesslice_contents(&self, slice: Handle) -> Result<&[u8], VrdError> {
        Ok(self.slices.get(slice)?.as_slice())
    }

    pub fn bytesslice_destroy(&mut self, slice: Handle) {
        self.slices.remove(slice);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;
    use crate::session::{Channel, ChannelKind, SessionCapabilities};

    fn session() -> NegotiatedSession {
        NegotiatedSession {
            width: 64,
            height: 64,
            pixel_format: PixelFormat::Bgra8,
            capabilities: SessionCapabilities::all(),
            channels: vec![Channel {
                id: 1,
                kind: ChannelKind::Io,
            }],
            share_id: 1,
        }
    }

    #[test]
    fn arena_insert_get_remove() {
        let mut arena = Arena::new();
        let h = arena.insert(41);
        *arena.get_mut(h).unwrap() += 1;
        assert_eq!(*arena.get(h).unwrap(), 42);
        assert_eq!(arena.remove(h), Some(42));
        assert!(!arena.is_live(h));
    }

    #[test]
    fn stale_handle_is_detected_after_slot_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert("first");
        arena.remove(old);

        // The slot is reused, with a new generation.
        let new = arena.insert("second");
        assert_eq!(new.index, old.index);
        assert_ne!(new.generation, old.generation);

        assert!(matches!(
            arena.get(old),
            Err(VrdError::InvalidState("object already disposed"))
        ));
        assert_eq!(*arena.get(new).unwrap(), "second");
    }

    #[test]
    fn double_remove_is_a_noop() {
        let mut arena = Arena::new();
        let h = arena.insert(7);
        assert_eq!(arena.remove(h), Some(7));
        assert_eq!(arena.remove(h), None);
    }

    #[test]
    fn session_lifecycle_through_boundary() {
        let mut b = Boundary::new();
        let s = b.create_session(session()).unwrap();
        b.destroy_session(s);
        // Second destroy is a no-op.
        b.destroy_session(s);

        // Any *use* of the stale handle is a reported fault.
        let img = b.create_image(64, 64, PixelFormat::Bgra8);
        let err = b
            .process(s, img, Action::Timer, &[])
            .unwrap_err();
        assert!(matches!(err, VrdError::InvalidState(_)));
    }

    #[test]
    fn process_through_boundary_works() {
        let mut b = Boundary::new();
        let s = b.create_session(session()).unwrap();
        let img = b.create_image(64, 64, PixelFormat::Bgra8);

        let seq = b.process(s, img, Action::Timer, &[]).unwrap();
        assert!(seq.is_empty());
        assert!(b.image_drain_dirty(img).unwrap().is_empty());
    }

    #[test]
    fn writebuf_contract() {
        let mut b = Boundary::new();
        let h = b.writebuf_new();
        b.writebuf_append(h, b"data").unwrap();
        assert_eq!(b.writebuf_len(h).unwrap(), 4);

        let mut out = [0u8; 4];
        b.writebuf_read_into(h, &mut out).unwrap();
        assert_eq!(&out, b"data");

        b.writebuf_clear(h).unwrap();
        b.writebuf_clear(h).unwrap(); // idempotent
        assert_eq!(b.writebuf_len(h).unwrap(), 0);

        b.writebuf_destroy(h);
        assert!(matches!(
            b.writebuf_clear(h),
            Err(VrdError::InvalidState(_))
        ));
    }

    #[test]
    fn bytesslice_contract() {
        let mut b = Boundary::new();
        let h = b.bytesslice_new(3);
        assert_eq!(b.bytesslice_size(h).unwrap(), 3);

        b.bytesslice_fill(h, &[1, 2, 3]).unwrap();
        assert_eq!(b.bytesslice_contents(h).unwrap(), &[1, 2, 3]);

        assert!(matches!(
            b.bytesslice_fill(h, &[1, 2]),
            Err(VrdError::LengthMismatch { .. })
        ));
        assert_eq!(b.bytesslice_contents(h).unwrap(), &[1, 2, 3]);

        b.bytesslice_destroy(h);
        assert!(matches!(
            b.bytesslice_size(h),
            Err(VrdError::InvalidState(_))
        ));
    }
}
