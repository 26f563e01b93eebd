//! VRD wire codec — fast-path updates and slow-path PDUs.
//!
//! # Wire Protocol
//!
//! ## Fast path (compact graphics encoding)
//! ```text
//! update_type  u8     0x0 bitmap, 0x1 pointer-hidden, 0x2 pointer-default
//! flags        u8     bit 0: zstd-compressed bitmap rect data
//! length       u16le  byte length of the update body
//! body         [length bytes]
//! ```
//! A payload may carry several updates back to back. A bitmap body is:
//! ```text
//! rect_count   u16le
//! per rect: x u16le, y u16le, width u16le, height u16le,
//!           data_len u32le, data [data_len bytes]
//! ```
//!
//! ## Slow path (general-purpose PDUs)
//! ```text
//! magic        u32le  "VRD1"
//! checksum     u32le  first 4 bytes of blake3 over the body (0 if empty)
//! pdu_type     u16le
//! channel_id   u16le
//! seq          u32le  strictly increasing per sender
//! body_len     u32le
//! body         [body_len bytes]
//! ```
//!
//! Decoding never reads past the supplied slice: every declared length
//! is checked against the remaining bytes first and truncation is a
//! typed [`VrdError::Truncated`].

use bitflags::bitflags;

use crate::buffer::WriteBuf;
use crate::error::VrdError;
use crate::image::Rect;

// ── Constants ────────────────────────────────────────────────────

/// Magic prefix of every slow-path PDU.
pub const SLOW_PATH_MAGIC: u32 = u32::from_le_bytes(*b"VRD1");

/// Fixed slow-path header size in bytes.
pub const SLOW_PATH_HEADER_LEN: usize = 20;

/// Fixed fast-path per-update header size in bytes.
pub const FAST_PATH_HEADER_LEN: usize = 4;

/// Largest body a single slow-path PDU may declare.
pub const MAX_PDU_BODY_SIZE: usize = 4 * 1024 * 1024;

// ── Little-endian field readers ──────────────────────────────────

fn need(src: &[u8], at: usize, len: usize, context: &'static str) -> Result<(), VrdError> {
    let end = at.checked_add(len).ok_or(VrdError::InvalidHeader(context))?;
    if end > src.len() {
        return Err(VrdError::Truncated {
            context,
            needed: len,
            remaining: src.len().saturating_sub(at),
        });
    }
    Ok(())
}

fn read_u16(src: &[u8], at: usize, context: &'static str) -> Result<u16, VrdError> {
    need(src, at, 2, context)?;
    Ok(u16::from_le_bytes([src[at], src[at + 1]]))
}

fn read_u32(src: &[u8], at: usize, context: &'static str) -> Result<u32, VrdError> {
    need(src, at, 4, context)?;
    Ok(u32::from_le_bytes([
        src[at],
        src[at + 1],
        src[at + 2],
        src[at + 3],
    ]))
}

/// Body checksum: first 4 bytes of the blake3 hash, 0 for empty bodies.
pub fn body_checksum(body: &[u8]) -> u32 {
    if body.is_empty() {
        return 0;
    }
    let hash = blake3::hash(body);
    u32::from_le_bytes(hash.as_bytes()[0..4].try_into().expect("hash is 32 bytes"))
}

// ── Fast path ────────────────────────────────────────────────────

/// Kind of a fast-path update.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathUpdateType {
    /// Bitmap rectangles to blit into the framebuffer.
    Bitmap = 0x0,
    /// Hide the remote pointer.
    PointerHidden = 0x1,
    /// Restore the default remote pointer.
    PointerDefault = 0x2,
}

impl TryFrom<u8> for FastPathUpdateType {
    type Error = VrdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(FastPathUpdateType::Bitmap),
            0x1 => Ok(FastPathUpdateType::PointerHidden),
            0x2 => Ok(FastPathUpdateType::PointerDefault),
            _ => Err(VrdError::UnknownVariant {
                type_name: "FastPathUpdateType",
                value: value as u64,
            }),
        }
    }
}

bitflags! {
    /// Per-update flags on the fast path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FastPathFlags: u8 {
        /// Bitmap rect data is zstd-compressed.
        const COMPRESSED = 0b0000_0001;
    }
}

/// One parsed fast-path update, borrowing its body from the payload.
#[derive(Debug, Clone, Copy)]
pub struct FastPathUpdate<'a> {
    pub update_type: FastPathUpdateType,
    pub flags: FastPathFlags,
    pub body: &'a [u8],
}

impl<'a> FastPathUpdate<'a> {
    /// Decode one update from the front of `src`, returning it and the
    /// number of bytes consumed.
    pub fn decode(src: &'a [u8]) -> Result<(Self, usize), VrdError> {
        need(src, 0, FAST_PATH_HEADER_LEN, "fast-path update header")?;
        let update_type = FastPathUpdateType::try_from(src[0])?;
        let flags = FastPathFlags::from_bits(src[1]).ok_or(VrdError::InvalidHeader(
            "unknown fast-path flag bits",
        ))?;
        let length = read_u16(src, 2, "fast-path update header")? as usize;
        need(src, FAST_PATH_HEADER_LEN, length, "fast-path update body")?;

        Ok((
            Self {
                update_type,
                flags,
                body: &src[FAST_PATH_HEADER_LEN..FAST_PATH_HEADER_LEN + length],
            },
            FAST_PATH_HEADER_LEN + length,
        ))
    }

    /// Encode one update into `buf` (test and peer-side helper).
    pub fn encode(
        buf: &mut WriteBuf,
        update_type: FastPathUpdateType,
        flags: FastPathFlags,
        body: &[u8],
    ) -> Result<(), VrdError> {
        if body.len() > u16::MAX as usize {
            return Err(VrdError::CapacityExceeded {
                requested: body.len(),
                ceiling: u16::MAX as usize,
            });
        }
        buf.append(&[update_type as u8, flags.bits()])?;
        buf.append(&(body.len() as u16).to_le_bytes())?;
        buf.append(body)?;
        Ok(())
    }
}

/// One rectangle of a bitmap update, data still in wire form.
#[derive(Debug, Clone, Copy)]
pub struct BitmapRect<'a> {
    pub rect: Rect,
    pub data: &'a [u8],
}

impl<'a> BitmapRect<'a> {
    /// Parse a full bitmap update body into its rectangles.
    ///
    /// Length-validates everything up front; geometry against the
    /// negotiated desktop is the stage's job.
    pub fn parse_body(body: &'a [u8]) -> Result<Vec<BitmapRect<'a>>, VrdError> {
        let count = read_u16(body, 0, "bitmap rect count")? as usize;
        let mut offset = 2;
        let mut rects = Vec::with_capacity(count);

        for _ in 0..count {
            let x = read_u16(body, offset, "bitmap rect header")?;
            let y = read_u16(body, offset + 2, "bitmap rect header")?;
            let width = read_u16(body, offset + 4, "bitmap rect header")?;
            let height = read_u16(body, offset + 6, "bitmap rect header")?;
            let data_len = read_u32(body, offset + 8, "bitmap rect header")? as usize;
            offset += 12;

            if width == 0 || height == 0 {
                return Err(VrdError::InvalidHeader("zero-extent bitmap rect"));
            }
            need(body, offset, data_len, "bitmap rect data")?;

            rects.push(BitmapRect {
                rect: Rect::new(x, y, width, height),
                data: &body[offset..offset + data_len],
            });
            offset += data_len;
        }

        if offset != body.len() {
            return Err(VrdError::InvalidHeader("trailing bytes after bitmap rects"));
        }
        Ok(rects)
    }

    /// Recover the tightly-packed pixel rows for this rectangle.
    ///
    /// With `compressed` the data is zstd-decoded first; either way the
    /// result must be exactly `width * height * bpp` bytes.
    pub fn pixel_data(&self, compressed: bool, bpp: usize) -> Result<Vec<u8>, VrdError> {
        let expected = self.rect.width as usize * self.rect.height as usize * bpp;
        let data = if compressed {
            zstd::decode_all(self.data).map_err(|e| VrdError::Decompression(e.to_string()))?
        } else {
            self.data.to_vec()
        };
        if data.len() != expected {
            return Err(VrdError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(data)
    }
}

/// Serialize a bitmap update body from raw rect data (test and
/// peer-side helper; `data` entries are already in wire form).
pub fn encode_bitmap_body(buf: &mut WriteBuf, rects: &[(Rect, &[u8])]) -> Result<(), VrdError> {
    buf.append(&(rects.len() as u16).to_le_bytes())?;
    for (rect, data) in rects {
        buf.append(&rect.x.to_le_bytes())?;
        buf.append(&rect.y.to_le_bytes())?;
        buf.append(&rect.width.to_le_bytes())?;
        buf.append(&rect.height.to_le_bytes())?;
        buf.append(&(data.len() as u32).to_le_bytes())?;
        buf.append(data)?;
    }
    Ok(())
}

// ── Slow path ────────────────────────────────────────────────────

/// Known slow-path PDU types.
///
/// Types with bit 7 set are responses/notifications that a receiver
/// may skip when unrecognised; an unknown type with bit 7 clear is a
/// protocol violation.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    /// Peer requests a sync point; requires a [`PduType::SyncAck`].
    SyncRequest = 0x01,
    /// Peer requests channel control; requires a [`PduType::ControlAck`].
    ControlRequest = 0x02,
    /// Peer deactivated the session (renegotiation follows).
    DeactivateAll = 0x10,
    /// Peer is shutting the session down.
    ShutdownRequest = 0x11,
    /// Slow-path bitmap update (same body encoding as the fast path).
    BitmapUpdate = 0x20,
    /// Marks the end of a rendered frame (u32le frame id body);
    /// requires a [`PduType::FrameAck`].
    FrameMarker = 0x21,
    /// Acknowledges a sync point.
    SyncAck = 0x81,
    /// Acknowledges a control request.
    ControlAck = 0x82,
    /// Acknowledges a rendered frame, echoing its frame id.
    FrameAck = 0x83,
    /// Synthetic input event (bincode body).
    InputEvent = 0x90,
    /// Periodic liveness message (empty body).
    Keepalive = 0x91,
}

impl PduType {
    /// Bit marking a type as skippable when unrecognised.
    pub const OPTIONAL_BIT: u16 = 0x80;
}

impl TryFrom<u16> for PduType {
    type Error = VrdError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PduType::SyncRequest),
            0x02 => Ok(PduType::ControlRequest),
            0x10 => Ok(PduType::DeactivateAll),
            0x11 => Ok(PduType::ShutdownRequest),
            0x20 => Ok(PduType::BitmapUpdate),
            0x21 => Ok(PduType::FrameMarker),
            0x81 => Ok(PduType::SyncAck),
            0x82 => Ok(PduType::ControlAck),
            0x83 => Ok(PduType::FrameAck),
            0x90 => Ok(PduType::InputEvent),
            0x91 => Ok(PduType::Keepalive),
            _ => Err(VrdError::UnknownVariant {
                type_name: "PduType",
                value: value as u64,
            }),
        }
    }
}

/// One decoded slow-path PDU, body borrowed from the payload.
///
/// `pdu_type` stays raw so the stage can distinguish "unknown but
/// skippable" from "unknown and required".
#[derive(Debug, Clone, Copy)]
pub struct SlowPathPdu<'a> {
    pub pdu_type: u16,
    pub channel_id: u16,
    pub seq: u32,
    pub body: &'a [u8],
}

impl<'a> SlowPathPdu<'a> {
    /// Decode one PDU from the front of `src`, returning it and the
    /// number of bytes consumed. Verifies magic and body checksum.
    pub fn decode(src: &'a [u8]) -> Result<(Self, usize), VrdError> {
        need(src, 0, SLOW_PATH_HEADER_LEN, "slow-path header")?;
        if read_u32(src, 0, "slow-path header")? != SLOW_PATH_MAGIC {
            return Err(VrdError::InvalidMagic);
        }
        let checksum = read_u32(src, 4, "slow-path header")?;
        let pdu_type = read_u16(src, 8, "slow-path header")?;
        let channel_id = read_u16(src, 10, "slow-path header")?;
        let seq = read_u32(src, 12, "slow-path header")?;
        let body_len = read_u32(src, 16, "slow-path header")? as usize;

        if body_len > MAX_PDU_BODY_SIZE {
            return Err(VrdError::InvalidHeader("declared body length too large"));
        }
        need(src, SLOW_PATH_HEADER_LEN, body_len, "slow-path body")?;
        let body = &src[SLOW_PATH_HEADER_LEN..SLOW_PATH_HEADER_LEN + body_len];

        if body_checksum(body) != checksum {
            return Err(VrdError::ChecksumMismatch);
        }

        Ok((
            Self {
                pdu_type,
                channel_id,
                seq,
                body,
            },
            SLOW_PATH_HEADER_LEN + body_len,
        ))
    }

    /// Serialize a PDU into `buf` with a freshly computed checksum.
    pub fn encode(
        buf: &mut WriteBuf,
        pdu_type: PduType,
        channel_id: u16,
        seq: u32,
        body: &[u8],
    ) -> Result<(), VrdError> {
        if body.len() > MAX_PDU_BODY_SIZE {
            return Err(VrdError::CapacityExceeded {
                requested: body.len(),
                ceiling: MAX_PDU_BODY_SIZE,
            });
        }
        buf.append(&SLOW_PATH_MAGIC.to_le_bytes())?;
        buf.append(&body_checksum(body).to_le_bytes())?;
        buf.append(&(pdu_type as u16).to_le_bytes())?;
        buf.append(&channel_id.to_le_bytes())?;
        buf.append(&seq.to_le_bytes())?;
        buf.append(&(body.len() as u32).to_le_bytes())?;
        buf.append(body)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
