//! Backend selection and routing.
//!
//! One capability trait covers every clipboard backend; the router picks a
//! variant at first use based on the session type and falls back from
//! Wayland to X11 (XWayland) both at initialization and per call.

use std::sync::Arc;
use std::sync::mpsc;

use crate::error::Error;
use crate::format::Format;

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub(crate) mod wayland;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub(crate) mod x11;

/// Trait for clipboard backend abstraction
///
/// A backend performs one foreground read or write at a time; the caller
/// (the crate-level entry points) holds the global serialization lock for
/// the duration of each call. Watching is layered over `read` by the
/// poller and is not part of the backend contract.
pub(crate) trait ClipboardBackend: Send + Sync {
    /// Read the current clipboard content in the given format.
    /// An empty payload is a valid result distinct from an error.
    fn read(&self, format: Format) -> Result<Vec<u8>, Error>;

    /// Publish `data` as the clipboard content for the given format.
    ///
    /// Returns once ownership is established. The returned channel fires
    /// (or disconnects) exactly once, when another application supersedes
    /// the content and the detached serving loop exits.
    fn write(&self, format: Format, data: Vec<u8>) -> Result<mpsc::Receiver<()>, Error>;

    /// Get the backend name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Whether the session-type signals point at a Wayland compositor
///
/// Split out from the env lookup so routing is testable without mutating
/// process environment.
fn session_prefers_wayland(wayland_display: Option<&str>, session_type: Option<&str>) -> bool {
    if wayland_display.is_some_and(|v| !v.is_empty()) {
        return true;
    }
    session_type == Some("wayland")
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
fn is_wayland_session() -> bool {
    use std::env;
    session_prefers_wayland(
        env::var("WAYLAND_DISPLAY").ok().as_deref(),
        env::var("XDG_SESSION_TYPE").ok().as_deref(),
    )
}

/// Create a clipboard backend for the current session
///
/// The result is cached process-wide by the caller; a failure here
/// short-circuits every subsequent operation with the same error.
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub(crate) fn create_backend() -> Result<Arc<dyn ClipboardBackend>, Error> {
    LinuxBackend::new().map(|backend| Arc::new(backend) as Arc<dyn ClipboardBackend>)
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
pub(crate) fn create_backend() -> Result<Arc<dyn ClipboardBackend>, Error> {
    Err(Error::UnsupportedPlatform)
}

/// Router over the two Linux protocol engines
///
/// Wayland is tried first when the session looks like one; any Wayland
/// failure on any call falls through to X11, which XWayland keeps working
/// under every mainstream compositor.
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub(crate) struct LinuxBackend {
    wayland: Option<wayland::WaylandBackend>,
    x11: x11::X11Backend,
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
impl LinuxBackend {
    fn new() -> Result<Self, Error> {
        let wayland = if is_wayland_session() {
            match wayland::WaylandBackend::connect() {
                Ok(backend) => {
                    log::info!("Detected Wayland session, data-control engine ready");
                    Some(backend)
                }
                Err(err) => {
                    log::warn!("Wayland initialization failed, falling back to X11: {err}");
                    None
                }
            }
        } else {
            None
        };

        let x11 = x11::X11Backend::new();
        if wayland.is_none() {
            // No Wayland engine to lean on, so the display probe decides
            // whether this process has any clipboard at all.
            x11.probe()?;
            log::info!("X11 ownership engine ready");
        }

        Ok(LinuxBackend { wayland, x11 })
    }
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
impl ClipboardBackend for LinuxBackend {
    fn read(&self, format: Format) -> Result<Vec<u8>, Error> {
        if let Some(wayland) = &self.wayland {
            match wayland.read(format) {
                Ok(data) => return Ok(data),
                Err(err) => {
                    log::debug!("Wayland read failed ({err}), retrying on X11");
                }
            }
        }
        self.x11.read(format)
    }

    fn write(&self, format: Format, data: Vec<u8>) -> Result<mpsc::Receiver<()>, Error> {
        if let Some(wayland) = &self.wayland {
            match wayland.write(format, data.clone()) {
                Ok(done) => return Ok(done),
                Err(err) => {
                    log::debug!("Wayland write failed ({err}), retrying on X11");
                }
            }
        }
        self.x11.write(format, data)
    }

    fn name(&self) -> &'static str {
        if self.wayland.is_some() { "Wayland" } else { "X11" }
    }
}
