//! Polling-based change watching.
//!
//! Neither exchange protocol gives a portable "content changed" push for
//! arbitrary formats, so watching is sampling: re-read on a fixed interval
//! and emit when the bytes differ from the last delivered payload. States
//! that come and go between ticks are skipped; this is a change stream,
//! not an edit log.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::backend::ClipboardBackend;
use crate::error::Error;
use crate::format::Format;

/// An active clipboard watch subscription
///
/// Payload snapshots arrive on the embedded channel. The subscription ends
/// when [`Watch::cancel`] is called or the handle is dropped; the stream
/// then closes exactly once, within one polling interval, and never emits
/// afterwards.
pub struct Watch {
    rx: mpsc::Receiver<Vec<u8>>,
    cancel: mpsc::Sender<()>,
}

impl Watch {
    /// Block until the clipboard content changes. `None` once the
    /// subscription has been cancelled and the stream is closed.
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.rx.recv().ok()
    }

    /// Like [`Watch::recv`], but gives up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take a pending change without blocking.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Stop the subscription. The polling loop exits on its next wakeup
    /// and closes the stream. Dropping the handle has the same effect.
    pub fn cancel(&self) {
        let _ = self.cancel.send(());
    }
}

/// Start a polling loop over `backend` for `format`
pub(crate) fn spawn(
    backend: Arc<dyn ClipboardBackend>,
    format: Format,
    interval: Duration,
) -> Result<Watch, Error> {
    let (out_tx, out_rx) = mpsc::channel();
    let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("selboard-watch".into())
        .spawn(move || {
            // No payload observed yet is distinct from an observed empty
            // payload: the first successful read always emits.
            let mut last: Option<Vec<u8>> = None;
            loop {
                // The cancel channel doubles as the poll timer.
                match cancel_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                match crate::locked_read(backend.as_ref(), format) {
                    Ok(data) => {
                        if last.as_ref() != Some(&data) {
                            if out_tx.send(data.clone()).is_err() {
                                // Receiver went away; nothing left to serve.
                                break;
                            }
                            last = Some(data);
                        }
                    }
                    Err(err) => {
                        // A transient failure must not end the subscription.
                        log::debug!("Watch read failed (ignored): {err}");
                    }
                }
            }
            // out_tx drops here, closing the stream exactly once.
        })
        .map_err(Error::unavailable)?;

    Ok(Watch {
        rx: out_rx,
        cancel: cancel_tx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_millis(500);

    /// Backend that replays a scripted sequence of read results, then
    /// reports the clipboard as unavailable.
    struct ScriptedBackend {
        reads: Mutex<VecDeque<Result<Vec<u8>, Error>>>,
    }

    impl ScriptedBackend {
        fn new(reads: Vec<Result<Vec<u8>, Error>>) -> Arc<Self> {
            Arc::new(ScriptedBackend {
                reads: Mutex::new(reads.into()),
            })
        }
    }

    impl ClipboardBackend for ScriptedBackend {
        fn read(&self, _format: Format) -> Result<Vec<u8>, Error> {
            self.reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::unavailable("script exhausted")))
        }

        fn write(&self, _format: Format, _data: Vec<u8>) -> Result<mpsc::Receiver<()>, Error> {
            Err(Error::unavailable("not writable"))
        }

        fn name(&self) -> &'static str {
            "Scripted"
        }
    }

    #[test]
    fn test_first_read_always_emits() {
        let backend = ScriptedBackend::new(vec![Ok(b"alpha".to_vec())]);
        let watch = spawn(backend, Format::Text, TICK).unwrap();
        assert_eq!(watch.recv_timeout(WAIT), Some(b"alpha".to_vec()));
    }

    #[test]
    fn test_empty_payload_is_a_real_emission() {
        // "Nothing observed yet" and "observed empty content" must differ
        let backend = ScriptedBackend::new(vec![Ok(Vec::new())]);
        let watch = spawn(backend, Format::Text, TICK).unwrap();
        assert_eq!(watch.recv_timeout(WAIT), Some(Vec::new()));
    }

    #[test]
    fn test_identical_content_emits_once() {
        let backend = ScriptedBackend::new(vec![
            Ok(b"same".to_vec()),
            Ok(b"same".to_vec()),
            Ok(b"same".to_vec()),
            Ok(b"next".to_vec()),
        ]);
        let watch = spawn(backend, Format::Text, TICK).unwrap();
        assert_eq!(watch.recv_timeout(WAIT), Some(b"same".to_vec()));
        // The duplicates are skipped; the next emission is the new value
        assert_eq!(watch.recv_timeout(WAIT), Some(b"next".to_vec()));
    }

    #[test]
    fn test_read_errors_are_swallowed() {
        let backend = ScriptedBackend::new(vec![
            Err(Error::unavailable("flaky display")),
            Err(Error::Unsupported),
            Ok(b"recovered".to_vec()),
        ]);
        let watch = spawn(backend, Format::Text, TICK).unwrap();
        assert_eq!(watch.recv_timeout(WAIT), Some(b"recovered".to_vec()));
    }

    #[test]
    fn test_cancel_closes_the_stream() {
        let backend = ScriptedBackend::new(vec![Ok(b"one".to_vec())]);
        let watch = spawn(backend, Format::Text, TICK).unwrap();
        assert_eq!(watch.recv_timeout(WAIT), Some(b"one".to_vec()));

        watch.cancel();
        // The loop observes the signal on its next wakeup and drops the
        // sender; recv unblocks with a closed stream, not a value.
        assert_eq!(watch.recv(), None);
        assert_eq!(watch.try_recv(), None);
    }

    #[test]
    fn test_cancel_before_first_tick_emits_nothing() {
        // A long interval guarantees the cancel signal wins the race
        // against the first poll.
        let backend = ScriptedBackend::new(vec![Ok(b"unseen".to_vec())]);
        let watch = spawn(backend, Format::Text, Duration::from_secs(60)).unwrap();
        watch.cancel();
        assert_eq!(watch.recv(), None);
    }

    /// Backend that records whether two reads ever overlapped.
    struct OverlapProbe {
        busy: AtomicBool,
        overlapped: AtomicBool,
        calls: AtomicUsize,
    }

    impl ClipboardBackend for OverlapProbe {
        fn read(&self, _format: Format) -> Result<Vec<u8>, Error> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            self.busy.store(false, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"probe".to_vec())
        }

        fn write(&self, _format: Format, _data: Vec<u8>) -> Result<mpsc::Receiver<()>, Error> {
            Err(Error::unavailable("not writable"))
        }

        fn name(&self) -> &'static str {
            "OverlapProbe"
        }
    }

    #[test]
    fn test_poll_reads_hold_the_global_lock() {
        let probe = Arc::new(OverlapProbe {
            busy: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let probe = Arc::clone(&probe);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let _ = crate::locked_read(probe.as_ref(), Format::Text);
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        assert_eq!(probe.calls.load(Ordering::SeqCst), 40);
        assert!(
            !probe.overlapped.load(Ordering::SeqCst),
            "reads through the global lock must never overlap"
        );
    }
}
