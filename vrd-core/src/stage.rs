//! The active stage — the post-handshake session state machine.
//!
//! The caller repeatedly hands the stage a [`Action`] plus the raw
//! payload bytes that triggered it; the stage mutates the
//! [`DecodedImage`] in place and yields an [`OutputSequence`] the
//! caller drains, performing the side effects it describes (send
//! bytes, redraw regions, tear the connection down).
//!
//! Processing is single-threaded and synchronous: `process` performs
//! no I/O and returns before the call completes. `&mut self` enforces
//! the one-in-flight-call rule at compile time.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::buffer::WriteBuf;
use crate::error::VrdError;
use crate::image::{DecodedImage, Rect};
use crate::input::InputEvent;
use crate::pdu::{
    BitmapRect, FastPathFlags, FastPathUpdate, FastPathUpdateType, PduType, SlowPathPdu,
};
use crate::session::{NegotiatedSession, SessionCapabilities};

/// How long the session may stay quiet before a timer tick emits a
/// keepalive.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ── Action ───────────────────────────────────────────────────────

/// What triggered this processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The payload is fast-path graphics traffic.
    FastPath,
    /// The payload is one or more slow-path PDUs.
    SlowPath,
    /// A synthetic input event to forward; the payload is ignored.
    Input(InputEvent),
    /// A timer tick; the payload is ignored.
    Timer,
}

// ── Output ───────────────────────────────────────────────────────

/// Why the stage is asking the caller to end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// The peer sent a shutdown request.
    PeerShutdown,
    /// A PDU arrived with a sequence number at or below the last
    /// accepted one.
    SequenceRegression { last: u32, got: u32 },
    /// A PDU addressed a channel missing from the routing table.
    UnknownChannel(u16),
    /// A required PDU type this implementation does not know.
    UnknownRequiredPdu(u16),
    /// Fast-path traffic arrived while the session was deactivated.
    SessionDeactivated,
}

impl std::fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerShutdown => write!(f, "peer requested shutdown"),
            Self::SequenceRegression { last, got } => {
                write!(f, "sequence regression: got {got} after {last}")
            }
            Self::UnknownChannel(id) => write!(f, "unknown channel {id:#06x}"),
            Self::UnknownRequiredPdu(t) => write!(f, "unknown required PDU type {t:#06x}"),
            Self::SessionDeactivated => write!(f, "fast-path traffic while deactivated"),
        }
    }
}

/// One unit of caller-facing work emitted by a processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputItem {
    /// Bytes for the caller's transport to send as-is.
    SendBytes(Bytes),
    /// A framebuffer region that changed and needs redrawing.
    GraphicsUpdated(Rect),
    /// The peer deactivated the session; renegotiation follows
    /// outside the stage.
    DeactivateAll,
    /// End the session. Always the last item of its sequence.
    Terminate(TerminateReason),
}

/// The finite, single-pass, ordered result of one `process` call.
///
/// Draining is destructive; the sequence is never restartable and
/// never shared across calls.
#[derive(Debug)]
pub struct OutputSequence {
    items: std::vec::IntoIter<OutputItem>,
}

impl OutputSequence {
    fn new(items: Vec<OutputItem>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    /// Items not yet drained.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is left to drain.
    pub fn is_empty(&self) -> bool {
        self.items.len() == 0
    }
}

impl Iterator for OutputSequence {
    type Item = OutputItem;

    fn next(&mut self) -> Option<OutputItem> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for OutputSequence {}

/// Pre-decoded body of one slow-path PDU, produced by the validation
/// pass so that acting on the PDU can no longer fail on malformed
/// input.
#[derive(Debug)]
enum PduBody {
    /// Bitmap rects with their pixel data already decoded.
    Bitmap(Vec<(Rect, Vec<u8>)>),
    /// Frame id carried by a frame marker.
    Frame(u32),
    /// Nothing pre-decoded for this PDU type.
    Opaque,
}

// ── ActiveStage ──────────────────────────────────────────────────

/// Session-level protocol state for one active connection.
///
/// Created once per connection from a validated [`NegotiatedSession`];
/// paired with exactly one [`teardown`](Self::teardown) (idempotent).
/// Calling [`process`](Self::process) after teardown is a caller error
/// reported as [`VrdError::InvalidState`].
#[derive(Debug)]
pub struct ActiveStage {
    session: NegotiatedSession,
    /// Sequence number stamped on outgoing PDUs, pre-incremented.
    send_seq: u32,
    /// Last accepted incoming sequence number (0 = none yet).
    last_recv_seq: u32,
    /// Frame markers acknowledged so far.
    acked_frames: u32,
    /// Cleared by `DeactivateAll`; fast-path traffic is a violation
    /// while clear.
    fast_path_active: bool,
    last_activity: Instant,
    write_buf: WriteBuf,
    torn_down: bool,
}

impl ActiveStage {
    /// Build the initial protocol state from a negotiated session.
    ///
    /// Fails with [`VrdError::InvalidSessionState`] when the session is
    /// incomplete (see [`NegotiatedSession::validate`]).
    pub fn new(session: NegotiatedSession) -> Result<Self, VrdError> {
        session.validate()?;
        debug!(
            width = session.width,
            height = session.height,
            channels = session.channels.len(),
            share_id = session.share_id,
            "active stage created"
        );
        Ok(Self {
            session,
            send_seq: 0,
            last_recv_seq: 0,
            acked_frames: 0,
            fast_path_active: true,
            last_activity: Instant::now(),
            write_buf: WriteBuf::with_capacity(4096),
            torn_down: false,
        })
    }

    /// The negotiated context this stage was built from.
    pub fn session(&self) -> &NegotiatedSession {
        &self.session
    }

    /// Whether fast-path traffic is currently legal.
    pub fn fast_path_active(&self) -> bool {
        self.fast_path_active
    }

    /// How many frame markers this stage has acknowledged.
    pub fn acked_frames(&self) -> u32 {
        self.acked_frames
    }

    /// The core transition function.
    ///
    /// Parses `payload` according to `action`, mutates `image` in
    /// place for graphics traffic, and returns the ordered outputs.
    /// A truncated or malformed payload fails with a decode error
    /// *before* any mutation: the image and the session counters are
    /// untouched and no output is produced.
    pub fn process(
        &mut self,
        image: &mut DecodedImage,
        action: Action,
        payload: &[u8],
    ) -> Result<OutputSequence, VrdError> {
        if self.torn_down {
            return Err(VrdError::InvalidState("active stage already torn down"));
        }

        match action {
            Action::FastPath => self.process_fast_path(image, payload),
            Action::SlowPath => self.process_slow_path(image, payload),
            Action::Input(event) => self.process_input(event),
            Action::Timer => self.process_timer(),
        }
    }

    /// Tear the stage down. Safe to call again; later `process` calls
    /// fail with [`VrdError::InvalidState`].
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        debug!("active stage torn down");
        self.write_buf.clear();
        self.torn_down = true;
    }

    /// Whether the stage was torn down.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ── Fast path ────────────────────────────────────────────────

    fn process_fast_path(
        &mut self,
        image: &mut DecodedImage,
        payload: &[u8],
    ) -> Result<OutputSequence, VrdError> {
        if !self.fast_path_active {
            warn!("fast-path payload while deactivated");
            return Ok(OutputSequence::new(vec![OutputItem::Terminate(
                TerminateReason::SessionDeactivated,
            )]));
        }

        let bpp = image.format().bytes_per_pixel();
        let compression_negotiated = self
            .session
            .capabilities
            .contains(SessionCapabilities::COMPRESSION);

        // Pass 1: decode and validate the whole payload before any
        // pixel is written, so a truncated tail cannot leave the image
        // half-updated.
        let mut pending: Vec<(Rect, Vec<u8>)> = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let (update, consumed) = FastPathUpdate::decode(&payload[offset..])?;
            offset += consumed;

            match update.update_type {
                FastPathUpdateType::Bitmap => {
                    let compressed = update.flags.contains(FastPathFlags::COMPRESSED);
                    if compressed && !compression_negotiated {
                        return Err(VrdError::InvalidHeader(
                            "compressed update without negotiated compression",
                        ));
                    }
                    for br in BitmapRect::parse_body(update.body)? {
                        if !image.in_bounds(&br.rect) {
                            return Err(VrdError::RectOutOfBounds {
                                x: br.rect.x,
                                y: br.rect.y,
                                width: br.rect.width,
                                height: br.rect.height,
                                max_width: image.width(),
                                max_height: image.height(),
                            });
                        }
                        pending.push((br.rect, br.pixel_data(compressed, bpp)?));
                    }
                }
                FastPathUpdateType::PointerHidden | FastPathUpdateType::PointerDefault => {
                    trace!(update_type = ?update.update_type, "pointer update ignored");
                }
            }
        }

        // Pass 2: apply, coalescing the regions of this decode pass so
        // adjacent or overlapping rects report as one update.
        let mut regions: Vec<Rect> = Vec::new();
        for (rect, data) in pending {
            image.apply_rect(rect, &data)?;
            Rect::coalesce_into(&mut regions, rect);
        }

        self.last_activity = Instant::now();
        trace!(regions = regions.len(), "fast-path graphics applied");
        Ok(OutputSequence::new(
            regions.into_iter().map(OutputItem::GraphicsUpdated).collect(),
        ))
    }

    // ── Slow path ────────────────────────────────────────────────

    fn process_slow_path(
        &mut self,
        image: &mut DecodedImage,
        payload: &[u8],
    ) -> Result<OutputSequence, VrdError> {
        let bpp = image.format().bytes_per_pixel();

        // Pass 1: decode every PDU (headers, checksums, bitmap bodies)
        // before acting on any of them.
        let mut pdus: Vec<SlowPathPdu<'_>> = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let (pdu, consumed) = SlowPathPdu::decode(&payload[offset..])?;
            offset += consumed;
            pdus.push(pdu);
        }

        let mut bodies: Vec<PduBody> = Vec::with_capacity(pdus.len());
        for pdu in &pdus {
            if pdu.pdu_type == PduType::BitmapUpdate as u16 {
                let mut rects = Vec::new();
                for br in BitmapRect::parse_body(pdu.body)? {
                    if !image.in_bounds(&br.rect) {
                        return Err(VrdError::RectOutOfBounds {
                            x: br.rect.x,
                            y: br.rect.y,
                            width: br.rect.width,
                            height: br.rect.height,
                            max_width: image.width(),
                            max_height: image.height(),
                        });
                    }
                    rects.push((br.rect, br.pixel_data(false, bpp)?));
                }
                bodies.push(PduBody::Bitmap(rects));
            } else if pdu.pdu_type == PduType::FrameMarker as u16 {
                let frame_id: [u8; 4] = pdu
                    .body
                    .try_into()
                    .map_err(|_| VrdError::InvalidHeader("frame marker body must be 4 bytes"))?;
                bodies.push(PduBody::Frame(u32::from_le_bytes(frame_id)));
            } else {
                bodies.push(PduBody::Opaque);
            }
        }

        // Pass 2: act on each PDU in parse order. A violation emits
        // Terminate as the final item and abandons the rest of the
        // payload.
        let mut outputs: Vec<OutputItem> = Vec::new();
        for (pdu, body) in pdus.iter().zip(bodies) {
            if !self.session.has_channel(pdu.channel_id) {
                warn!(channel = pdu.channel_id, "PDU on unknown channel");
                outputs.push(OutputItem::Terminate(TerminateReason::UnknownChannel(
                    pdu.channel_id,
                )));
                break;
            }
            if pdu.seq <= self.last_recv_seq {
                warn!(
                    got = pdu.seq,
                    last = self.last_recv_seq,
                    "sequence regression"
                );
                outputs.push(OutputItem::Terminate(TerminateReason::SequenceRegression {
                    last: self.last_recv_seq,
                    got: pdu.seq,
                }));
                break;
            }
            self.last_recv_seq = pdu.seq;

            match PduType::try_from(pdu.pdu_type) {
                Ok(PduType::SyncRequest) => {
                    let bytes = self.encode_response(PduType::SyncAck, &pdu.seq.to_le_bytes())?;
                    outputs.push(OutputItem::SendBytes(bytes));
                }
                Ok(PduType::ControlRequest) => {
                    let bytes =
                        self.encode_response(PduType::ControlAck, &pdu.seq.to_le_bytes())?;
                    outputs.push(OutputItem::SendBytes(bytes));
                }
                Ok(PduType::DeactivateAll) => {
                    debug!("session deactivated by peer");
                    self.fast_path_active = false;
                    outputs.push(OutputItem::DeactivateAll);
                }
                Ok(PduType::ShutdownRequest) => {
                    debug!("peer requested shutdown");
                    outputs.push(OutputItem::Terminate(TerminateReason::PeerShutdown));
                    break;
                }
                Ok(PduType::BitmapUpdate) => {
                    // Pass 1 decoded a Bitmap body for every PDU of
                    // this type.
                    let mut regions: Vec<Rect> = Vec::new();
                    if let PduBody::Bitmap(rects) = body {
                        for (rect, data) in rects {
                            image.apply_rect(rect, &data)?;
                            Rect::coalesce_into(&mut regions, rect);
                        }
                    }
                    outputs.extend(regions.into_iter().map(OutputItem::GraphicsUpdated));
                }
                Ok(PduType::FrameMarker) => {
                    if let PduBody::Frame(frame_id) = body {
                        self.acked_frames = self.acked_frames.wrapping_add(1);
                        trace!(frame_id, acked = self.acked_frames, "frame acknowledged");
                        let bytes =
                            self.encode_response(PduType::FrameAck, &frame_id.to_le_bytes())?;
                        outputs.push(OutputItem::SendBytes(bytes));
                    }
                }
                Ok(PduType::SyncAck)
                | Ok(PduType::ControlAck)
                | Ok(PduType::FrameAck)
                | Ok(PduType::InputEvent)
                | Ok(PduType::Keepalive) => {
                    trace!(pdu_type = pdu.pdu_type, "notification PDU ignored");
                }
                Err(_) if pdu.pdu_type & PduType::OPTIONAL_BIT != 0 => {
                    warn!(pdu_type = pdu.pdu_type, "skipping unknown optional PDU");
                }
                Err(_) => {
                    warn!(pdu_type = pdu.pdu_type, "unknown required PDU");
                    outputs.push(OutputItem::Terminate(TerminateReason::UnknownRequiredPdu(
                        pdu.pdu_type,
                    )));
                    break;
                }
            }
        }

        self.last_activity = Instant::now();
        Ok(OutputSequence::new(outputs))
    }

    // ── Input / timer ────────────────────────────────────────────

    fn process_input(&mut self, event: InputEvent) -> Result<OutputSequence, VrdError> {
        if !self
            .session
            .capabilities
            .contains(SessionCapabilities::INPUT_EVENTS)
        {
            warn!("input event dropped: capability not negotiated");
            return Ok(OutputSequence::new(Vec::new()));
        }
        let body = event.to_bytes()?;
        let bytes = self.encode_response(PduType::InputEvent, &body)?;
        self.last_activity = Instant::now();
        Ok(OutputSequence::new(vec![OutputItem::SendBytes(bytes)]))
    }

    fn process_timer(&mut self) -> Result<OutputSequence, VrdError> {
        if !self
            .session
            .capabilities
            .contains(SessionCapabilities::KEEPALIVE)
            || self.last_activity.elapsed() < KEEPALIVE_INTERVAL
        {
            return Ok(OutputSequence::new(Vec::new()));
        }
        trace!("emitting keepalive");
        let bytes = self.encode_response(PduType::Keepalive, &[])?;
        self.last_activity = Instant::now();
        Ok(OutputSequence::new(vec![OutputItem::SendBytes(bytes)]))
    }

    // ── Serialization ────────────────────────────────────────────

    /// Serialize an outgoing PDU on the I/O channel with the next
    /// sequence number, reusing the stage's write buffer.
    fn encode_response(&mut self, pdu_type: PduType, body: &[u8]) -> Result<Bytes, VrdError> {
        let channel = self
            .session
            .io_channel_id()
            .ok_or(VrdError::InvalidSessionState("missing I/O channel"))?;
        self.send_seq = self.send_seq.wrapping_add(1);
        self.write_buf.clear();
        SlowPathPdu::encode(&mut self.write_buf, pdu_type, channel, self.send_seq, body)?;
        Ok(self.write_buf.take_bytes())
    }
}

// ── Tests ────────────────────────────────────────────────────────
