//! # vrd-core
//!
//! Session-processing core of the VRD remote desktop client: the
//! post-handshake state machine that turns received payloads into
//! framebuffer updates, response bytes, and termination signals.
//!
//! This crate contains:
//! - **Stage**: `ActiveStage` — the per-connection state machine, fed
//!   by `Action` + payload, yielding an `OutputSequence`
//! - **Wire codec**: fast-path updates and checksummed slow-path PDUs
//! - **Image**: `DecodedImage` framebuffer with dirty-rect tracking
//! - **Buffers**: `WriteBuf` (growable, capped) and `BytesSlice`
//!   (fixed-size, exact-fill)
//! - **Session**: `NegotiatedSession` — the immutable context the
//!   connection sequence hands over
//! - **Boundary**: generation-checked handle arena for embedders
//! - **Error**: `VrdError` — typed, `thiserror`-based error hierarchy
//!
//! Connection negotiation, transport I/O, and rendering live outside
//! this crate; the caller drains each `OutputSequence` and performs
//! the side effects it describes.

pub mod boundary;
pub mod buffer;
pub mod error;
pub mod image;
pub mod input;
pub mod pdu;
pub mod session;
pub mod stage;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use boundary::{Arena, Boundary, Handle};
pub use buffer::{BytesSlice, WriteBuf, MAX_WRITE_BUF_SIZE};
pub use error::VrdError;
pub use image::{DecodedImage, PixelFormat, Rect};
pub use input::{InputEvent, KeyAction, KeyEvent, MouseButton, MouseEvent, MouseEventKind};
pub use pdu::{
    BitmapRect, FastPathFlags, FastPathUpdate, FastPathUpdateType, PduType, SlowPathPdu,
};
pub use session::{Channel, ChannelKind, NegotiatedSession, SessionCapabilities};
pub use stage::{
    Action, ActiveStage, OutputItem, OutputSequence, TerminateReason, KEEPALIVE_INTERVAL,
};
