//! X11 ownership engine.
//!
//! X11 has no clipboard store: whoever owns the `CLIPBOARD` selection is
//! asked, request by request, to convert its content into a target format
//! and deposit the bytes into a property on the requestor's window. A read
//! is therefore a short protocol conversation, and a write means claiming
//! ownership and answering conversion requests until another client takes
//! the selection over.
//!
//! Connections are cheap to open, so each operation gets its own; the
//! connection (and with it the throwaway window and any pending state) is
//! closed on every exit path when the session drops.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, PropMode,
    SELECTION_NOTIFY_EVENT, SelectionNotifyEvent, SelectionRequestEvent, Time, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::{COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT};

use crate::error::Error;
use crate::format::Format;

/// The X server can transiently refuse connections while sessions are
/// starting up, so opening the display is retried a bounded number of times.
const CONNECT_ATTEMPTS: usize = 42;

/// How long a read waits for the selection owner to convert. Image owners
/// can take seconds to encode, so this is deliberately generous; hitting it
/// maps to `Unavailable` rather than hanging the caller forever.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(4);

x11rb::atom_manager! {
    Atoms: AtomsCookie {
        CLIPBOARD,
        TARGETS,
        ATOM,
        INCR,
        // Property on our window into which selection owners write the
        // bytes we requested.
        SELBOARD_DATA,
    }
}

/// A per-operation connection with a throwaway window for selection traffic
struct XSession {
    conn: RustConnection,
    win: u32,
}

impl XSession {
    fn open() -> Result<Self, Error> {
        let mut connected = None;
        let mut last_err = None;
        for _ in 0..CONNECT_ATTEMPTS {
            match RustConnection::connect(None) {
                Ok(ok) => {
                    connected = Some(ok);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let Some((conn, screen_num)) = connected else {
            return Err(match last_err {
                Some(err) => Error::unavailable(format!("failed to open X display: {err}")),
                None => Error::unavailable("failed to open X display"),
            });
        };

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| Error::unavailable("X display has no screen"))?;
        let win = conn.generate_id().map_err(Error::unavailable)?;
        conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            win,
            screen.root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::COPY_FROM_PARENT,
            COPY_FROM_PARENT,
            &CreateWindowAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )
        .map_err(Error::unavailable)?;
        conn.flush().map_err(Error::unavailable)?;

        Ok(XSession { conn, win })
    }

    fn atoms(&self) -> Result<Atoms, Error> {
        Atoms::new(&self.conn)
            .map_err(Error::unavailable)?
            .reply()
            .map_err(Error::unavailable)
    }

    /// Resolve the target atom for a format without creating it; a name the
    /// server has never seen means no client can serve that format.
    fn intern_target(&self, name: &str) -> Result<Atom, Error> {
        let reply = self
            .conn
            .intern_atom(true, name.as_bytes())
            .map_err(Error::unavailable)?
            .reply()
            .map_err(Error::unavailable)?;
        if reply.atom == x11rb::NONE {
            return Err(Error::Unsupported);
        }
        Ok(reply.atom)
    }
}

pub(crate) struct X11Backend;

impl X11Backend {
    pub(crate) fn new() -> Self {
        X11Backend
    }

    /// Check that a display connection can be established at all
    pub(crate) fn probe(&self) -> Result<(), Error> {
        XSession::open().map(|_| ())
    }

    pub(crate) fn read(&self, format: Format) -> Result<Vec<u8>, Error> {
        let session = XSession::open()?;
        let atoms = session.atoms()?;
        let target = session.intern_target(format.x11_target())?;

        session
            .conn
            .convert_selection(
                session.win,
                atoms.CLIPBOARD,
                target,
                atoms.SELBOARD_DATA,
                Time::CURRENT_TIME,
            )
            .map_err(Error::unavailable)?;
        session.conn.flush().map_err(Error::unavailable)?;

        let notify = wait_for_notify(&session, &atoms)?;
        if notify.property == x11rb::NONE {
            // The owner declined the conversion: no data in this format.
            return Err(Error::unavailable(
                "selection owner has no data for the requested target",
            ));
        }

        let reply = session
            .conn
            .get_property(
                false,
                session.win,
                atoms.SELBOARD_DATA,
                AtomEnum::ANY,
                0,
                u32::MAX / 4,
            )
            .map_err(Error::unavailable)?
            .reply()
            .map_err(Error::unavailable)?;

        // Protocol hygiene: the owner's data sits in our window property
        // until we delete it.
        session
            .conn
            .delete_property(session.win, atoms.SELBOARD_DATA)
            .map_err(Error::unavailable)?;
        session.conn.flush().map_err(Error::unavailable)?;

        if reply.type_ == atoms.INCR {
            log::debug!("Selection owner insists on an INCR transfer, which is not supported");
            return Err(Error::unavailable(
                "selection owner requires incremental transfer",
            ));
        }

        // Zero items is a valid result: the clipboard holds empty content.
        Ok(reply.value)
    }

    pub(crate) fn write(&self, format: Format, data: Vec<u8>) -> Result<mpsc::Receiver<()>, Error> {
        let session = XSession::open()?;
        let atoms = session.atoms()?;
        let target = session.intern_target(format.x11_target())?;

        session
            .conn
            .set_selection_owner(session.win, atoms.CLIPBOARD, Time::CURRENT_TIME)
            .map_err(Error::unavailable)?;
        session.conn.flush().map_err(Error::unavailable)?;

        // Ownership is not guaranteed by the request alone; read back who
        // the server thinks owns the selection before promising anything.
        let owner = session
            .conn
            .get_selection_owner(atoms.CLIPBOARD)
            .map_err(Error::unavailable)?
            .reply()
            .map_err(Error::unavailable)?
            .owner;
        if owner != session.win {
            return Err(Error::unavailable(
                "could not take ownership of the CLIPBOARD selection",
            ));
        }

        log::debug!(
            "Owning CLIPBOARD with {} bytes as {}",
            data.len(),
            format.x11_target()
        );

        let (done_tx, done_rx) = mpsc::channel();
        thread::Builder::new()
            .name("selboard-x11-serve".into())
            .spawn(move || serve_requests(session, atoms, target, data, done_tx))
            .map_err(Error::unavailable)?;

        Ok(done_rx)
    }
}

/// Wait (bounded) for the `SelectionNotify` answering our conversion
/// request, discarding unrelated events.
fn wait_for_notify(session: &XSession, atoms: &Atoms) -> Result<SelectionNotifyEvent, Error> {
    let deadline = Instant::now() + NOTIFY_TIMEOUT;
    loop {
        if Instant::now() >= deadline {
            return Err(Error::unavailable(
                "timed out waiting for the selection owner to respond",
            ));
        }
        match session.conn.poll_for_event().map_err(Error::unavailable)? {
            None => thread::sleep(Duration::from_millis(1)),
            Some(Event::SelectionNotify(ev)) => {
                if ev.requestor == session.win && ev.selection == atoms.CLIPBOARD {
                    return Ok(ev);
                }
            }
            Some(_) => {}
        }
    }
}

/// Detached serving loop for a write: answers conversion requests out of
/// the buffered payload until another client claims the selection.
fn serve_requests(
    session: XSession,
    atoms: Atoms,
    target: Atom,
    data: Vec<u8>,
    done: mpsc::Sender<()>,
) {
    loop {
        let event = match session.conn.wait_for_event() {
            Ok(event) => event,
            Err(err) => {
                log::debug!("X11 serving loop lost its connection: {err}");
                return;
            }
        };
        match event {
            Event::SelectionClear(ev) if ev.selection == atoms.CLIPBOARD => {
                log::debug!("CLIPBOARD ownership taken over by another client");
                let _ = done.send(());
                return;
            }
            Event::SelectionRequest(ev) => {
                if ev.selection != atoms.CLIPBOARD {
                    continue;
                }
                if let Err(err) = answer_request(&session, &atoms, target, &data, &ev) {
                    log::debug!("Failed to answer a selection request: {err}");
                }
            }
            _ => {}
        }
    }
}

fn answer_request(
    session: &XSession,
    atoms: &Atoms,
    target: Atom,
    data: &[u8],
    req: &SelectionRequestEvent,
) -> Result<(), Error> {
    let property = if req.target == target {
        // An empty payload still gets a (zero-length) property: clearing
        // the clipboard is a valid write.
        session
            .conn
            .change_property8(PropMode::REPLACE, req.requestor, req.property, target, data)
            .map_err(Error::unavailable)?;
        req.property
    } else if req.target == atoms.TARGETS {
        let offered = [atoms.TARGETS, target];
        session
            .conn
            .change_property32(
                PropMode::REPLACE,
                req.requestor,
                req.property,
                atoms.ATOM,
                &offered,
            )
            .map_err(Error::unavailable)?;
        req.property
    } else {
        // ICCCM refusal: notify with property None instead of going silent.
        x11rb::NONE
    };

    let notify = SelectionNotifyEvent {
        response_type: SELECTION_NOTIFY_EVENT,
        sequence: req.sequence,
        time: req.time,
        requestor: req.requestor,
        selection: req.selection,
        target: req.target,
        property,
    };
    session
        .conn
        .send_event(false, req.requestor, EventMask::NO_EVENT, notify)
        .map_err(Error::unavailable)?;
    session.conn.flush().map_err(Error::unavailable)
}
