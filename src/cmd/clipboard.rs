//! Clipboard integration is out of scope: no platform clipboard crate is in
//! the dependency graph. This trait exists so `copy`/`paste` have a real
//! seam to call through, and so the "unavailable" behavior is a normal
//! implementation of the trait rather than a special case in the command
//! handlers.

pub trait Clipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError>;
    fn paste(&self) -> Result<String, ClipboardError>;
}

#[derive(Debug)]
pub struct ClipboardError;

/// The only implementation shipped: every call reports unavailable. A real
/// platform backend (X11/Wayland/macOS/Windows) would live behind this same
/// trait without touching `cmd::safe_ops`.
pub struct UnavailableClipboard;

impl Clipboard for UnavailableClipboard {
    fn copy(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError)
    }

    fn paste(&self) -> Result<String, ClipboardError> {
        Err(ClipboardError)
    }
}
