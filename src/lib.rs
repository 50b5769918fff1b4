//! Selboard - clipboard access over native display-server protocols
//!
//! Read, write and watch clipboard content (UTF-8 text and PNG images)
//! through the display server's own exchange protocol: the wlr-data-control
//! protocol on Wayland, the selection-ownership protocol on X11. The
//! backend is picked from the session type at first use, and Wayland
//! failures fall back to X11 (XWayland) transparently.
//!
//! ```no_run
//! use selboard::Format;
//!
//! // Publish text; the handle signals when another app takes over.
//! let handle = selboard::write(Format::Text, b"hello world".to_vec())?;
//!
//! // Read it back.
//! let data = selboard::read(Format::Text)?;
//! assert_eq!(data, b"hello world");
//! # Ok::<(), selboard::Error>(())
//! ```
//!
//! Watching polls for changes and emits deduplicated snapshots:
//!
//! ```no_run
//! let watch = selboard::watch(selboard::Format::Text)?;
//! while let Some(content) = watch.recv() {
//!     println!("clipboard changed: {} bytes", content.len());
//! }
//! # Ok::<(), selboard::Error>(())
//! ```

mod backend;
mod error;
mod format;
mod watch;

pub use error::Error;
pub use format::Format;
pub use watch::Watch;

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use backend::ClipboardBackend;

/// Poll cadence used by [`watch`]
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Backend chosen once per process; an initialization failure is cached and
/// short-circuits every later operation with the same error.
static BACKEND: OnceLock<Result<Arc<dyn ClipboardBackend>, Error>> = OnceLock::new();

/// Several backend operations (X11 window setup and event loops in
/// particular) are not safe to run from multiple call sites at once, so one
/// process-wide gate serializes every foreground read and write.
static OP_LOCK: Mutex<()> = Mutex::new(());

fn global_backend() -> Result<Arc<dyn ClipboardBackend>, Error> {
    BACKEND.get_or_init(backend::create_backend).clone()
}

/// Perform one read while holding the global serialization lock.
///
/// Shared by the public [`read`] entry point and each iteration of a watch
/// poll loop; the lock spans exactly one backend call.
pub(crate) fn locked_read(backend: &dyn ClipboardBackend, format: Format) -> Result<Vec<u8>, Error> {
    let _guard = OP_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    backend.read(format)
}

/// Read the current clipboard content in the given format
///
/// An empty payload is a valid result: the clipboard holds zero-length
/// content of this format. Unreachable clipboards yield
/// [`Error::Unavailable`], unresolvable formats [`Error::Unsupported`].
pub fn read(format: Format) -> Result<Vec<u8>, Error> {
    let backend = global_backend()?;
    locked_read(backend.as_ref(), format)
}

/// Publish `data` as the clipboard content for the given format
///
/// Returns once ownership of the clipboard is established; serving paste
/// requests continues on a detached task. The returned [`WriteHandle`]
/// fires exactly once, when another application supersedes the content.
/// Writing an empty payload is valid and clears the clipboard.
pub fn write(format: Format, data: Vec<u8>) -> Result<WriteHandle, Error> {
    let backend = global_backend()?;
    let superseded = {
        let _guard = OP_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        backend.write(format, data)?
    };
    Ok(WriteHandle { superseded })
}

/// Watch the clipboard for content changes in the given format
///
/// Emits a snapshot whenever the content differs from the last delivered
/// payload, polling once per [`POLL_INTERVAL`]. Read errors during polling
/// are swallowed; the subscription only ends through [`Watch::cancel`] or
/// by dropping the handle.
pub fn watch(format: Format) -> Result<Watch, Error> {
    watch_with_interval(format, POLL_INTERVAL)
}

/// [`watch`] with a caller-chosen polling interval
pub fn watch_with_interval(format: Format, interval: Duration) -> Result<Watch, Error> {
    let backend = global_backend()?;
    watch::spawn(backend, format, interval)
}

/// Handle to a completed write
///
/// The clipboard content installed by [`write`] stays served until another
/// application claims the clipboard; this handle reports that moment. A
/// closed signal channel (the serving task exited without a clean
/// supersession event) also counts as superseded, since the content is no
/// longer being served either way.
pub struct WriteHandle {
    superseded: mpsc::Receiver<()>,
}

impl WriteHandle {
    /// Block until the written content has been superseded.
    pub fn wait(&self) {
        let _ = self.superseded.recv();
    }

    /// Block until the content is superseded or `timeout` elapses.
    /// Returns `true` if it was superseded.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(
            self.superseded.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Non-blocking check whether the content has been superseded.
    pub fn is_superseded(&self) -> bool {
        !matches!(self.superseded.try_recv(), Err(TryRecvError::Empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_handle_reports_supersession_once_signalled() {
        let (tx, rx) = mpsc::channel();
        let handle = WriteHandle { superseded: rx };
        assert!(!handle.is_superseded());

        tx.send(()).unwrap();
        assert!(handle.is_superseded());
    }

    #[test]
    fn test_write_handle_treats_dead_serving_loop_as_superseded() {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = WriteHandle { superseded: rx };
        drop(tx);
        assert!(handle.is_superseded());
        assert!(handle.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_timeout_expires_while_content_is_current() {
        let (_tx, rx) = mpsc::channel::<()>();
        let handle = WriteHandle { superseded: rx };
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
    }
}
