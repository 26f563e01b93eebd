//! Synthetic input events forwarded to the peer.
//!
//! The caller's UI layer constructs these; the active stage only
//! serializes them into an `InputEvent` PDU. Injection on the remote
//! end is the peer's business.

use serde::{Deserialize, Serialize};

use crate::error::VrdError;

// ── Mouse ────────────────────────────────────────────────────────

/// A mouse event in desktop coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MouseEvent {
    /// X position in desktop coordinates.
    pub x: i32,
    /// Y position in desktop coordinates.
    pub y: i32,
    /// Type of mouse event.
    pub kind: MouseEventKind,
    /// Which button (if applicable).
    pub button: MouseButton,
    /// Scroll delta (for scroll events).
    pub scroll_delta: i16,
}

impl MouseEvent {
    /// A pointer move to `(x, y)`.
    pub fn moved(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            kind: MouseEventKind::Move,
            button: MouseButton::None,
            scroll_delta: 0,
        }
    }

    /// A button press at `(x, y)`.
    pub fn press(x: i32, y: i32, button: MouseButton) -> Self {
        Self {
            x,
            y,
            kind: MouseEventKind::Press,
            button,
            scroll_delta: 0,
        }
    }

    /// A button release at `(x, y)`.
    pub fn release(x: i32, y: i32, button: MouseButton) -> Self {
        Self {
            x,
            y,
            kind: MouseEventKind::Release,
            button,
            scroll_delta: 0,
        }
    }

    /// A vertical scroll at `(x, y)`.
    pub fn scroll(x: i32, y: i32, delta: i16) -> Self {
        Self {
            x,
            y,
            kind: MouseEventKind::Scroll,
            button: MouseButton::None,
            scroll_delta: delta,
        }
    }
}

/// Type of mouse event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MouseEventKind {
    Move,
    Press,
    Release,
    Scroll,
}

/// Mouse button involved in a press/release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MouseButton {
    None,
    Left,
    Right,
    Middle,
    X1,
    X2,
}

// ── Keyboard ─────────────────────────────────────────────────────

/// A keyboard event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyEvent {
    /// Hardware scan code.
    pub scan_code: u16,
    /// Whether this is a press or release.
    pub action: KeyAction,
    /// Modifier flags (Shift, Ctrl, Alt, ...), caller-defined bits.
    pub modifiers: u8,
}

/// Press or release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
}

impl KeyEvent {
    pub fn press(scan_code: u16, modifiers: u8) -> Self {
        Self {
            scan_code,
            action: KeyAction::Press,
            modifiers,
        }
    }

    pub fn release(scan_code: u16, modifiers: u8) -> Self {
        Self {
            scan_code,
            action: KeyAction::Release,
            modifiers,
        }
    }
}

// ── InputEvent ───────────────────────────────────────────────────

/// Any synthetic input event, as carried in an `InputEvent` PDU body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InputEvent {
    Mouse(MouseEvent),
    Key(KeyEvent),
}

impl InputEvent {
    /// Serialize to a PDU body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, VrdError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from a PDU body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VrdError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_event_roundtrip() {
        let ev = InputEvent::Mouse(MouseEvent::press(120, 340, MouseButton::Left));
        let bytes = ev.to_bytes().unwrap();
        assert_eq!(InputEvent::from_bytes(&bytes).unwrap(), ev);
    }

    #[test]
    fn key_event_roundtrip() {
        let ev = InputEvent::Key(KeyEvent::press(0x1C, 0b0000_0001));
        let bytes = ev.to_bytes().unwrap();
        assert_eq!(InputEvent::from_bytes(&bytes).unwrap(), ev);
    }

    #[test]
    fn garbage_body_fails() {
        assert!(matches!(
            InputEvent::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(VrdError::Encoding(_))
        ));
    }
}
