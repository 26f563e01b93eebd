//! Negotiated session context.
//!
//! Everything here is established by the connection sequence *before*
//! the active stage begins and is immutable for the stage's lifetime.
//! The core only validates that the context is complete enough to run.

use bitflags::bitflags;

use crate::error::VrdError;
use crate::image::PixelFormat;

bitflags! {
    /// Capabilities agreed during negotiation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionCapabilities: u32 {
        /// Peer sends graphics on the compact fast path.
        const FAST_PATH_OUTPUT = 0b0000_0001;
        /// Peer accepts synthetic input events.
        const INPUT_EVENTS     = 0b0000_0010;
        /// Bitmap rect data may be zstd-compressed.
        const COMPRESSION      = 0b0000_0100;
        /// Peer expects periodic keepalives over the I/O channel.
        const KEEPALIVE        = 0b0000_1000;
    }
}

// ── Channels ─────────────────────────────────────────────────────

/// What a negotiated channel carries.
///
/// Virtual channels beyond the I/O channel are routed opaquely; their
/// application semantics live outside the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// The mandatory control/graphics channel.
    Io,
    /// An opaque virtual channel (clipboard, audio, ...).
    Virtual,
}

/// One entry in the session's channel routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub id: u16,
    pub kind: ChannelKind,
}

// ── NegotiatedSession ────────────────────────────────────────────

/// The immutable parameter set the active stage is built from.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    /// Desktop width in pixels.
    pub width: u16,
    /// Desktop height in pixels.
    pub height: u16,
    /// Pixel layout of the decoded framebuffer.
    pub pixel_format: PixelFormat,
    /// Agreed capability set.
    pub capabilities: SessionCapabilities,
    /// Channel routing table (must contain exactly one I/O channel).
    pub channels: Vec<Channel>,
    /// Share identifier assigned by the peer during negotiation.
    pub share_id: u32,
}

impl NegotiatedSession {
    /// The id of the mandatory I/O channel, if present.
    pub fn io_channel_id(&self) -> Option<u16> {
        self.channels
            .iter()
            .find(|c| c.kind == ChannelKind::Io)
            .map(|c| c.id)
    }

    /// Whether `id` appears in the routing table.
    pub fn has_channel(&self, id: u16) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }

    /// Check the context is complete enough to drive an active stage.
    ///
    /// Required: non-zero geometry, a non-empty channel table with an
    /// I/O channel, and the fast-path output capability (the protocol
    /// has no slow-path-only graphics mode).
    pub fn validate(&self) -> Result<(), VrdError> {
        if self.width == 0 || self.height == 0 {
            return Err(VrdError::InvalidSessionState("zero desktop geometry"));
        }
        if self.channels.is_empty() {
            return Err(VrdError::InvalidSessionState("empty channel table"));
        }
        if self.io_channel_id().is_none() {
            return Err(VrdError::InvalidSessionState("missing I/O channel"));
        }
        if !self
            .capabilities
            .contains(SessionCapabilities::FAST_PATH_OUTPUT)
        {
            return Err(VrdError::InvalidSessionState(
                "missing fast-path output capability",
            ));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
