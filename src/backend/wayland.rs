//! Wayland data-control engine.
//!
//! Talks the wlr-data-control protocol directly to the compositor: clipboard
//! content arrives as data offers announced on a per-seat device, and
//! publishing content means installing a data source and serving `send`
//! requests over file descriptors until the compositor cancels the source.
//!
//! One connection is established per process. Each operation binds its own
//! data-control device on a private event queue, so every piece of protocol
//! state is owned by exactly one dispatch loop and nothing is shared
//! mutably between callbacks and callers.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use wayland_client::globals::{GlobalListContents, registry_queue_init};
use wayland_client::protocol::wl_registry::WlRegistry;
use wayland_client::protocol::wl_seat::WlSeat;
use wayland_client::{Connection, Dispatch, EventQueue, QueueHandle, event_created_child};
use wayland_protocols_wlr::data_control::v1::client::{
    zwlr_data_control_device_v1::{self, ZwlrDataControlDeviceV1},
    zwlr_data_control_manager_v1::ZwlrDataControlManagerV1,
    zwlr_data_control_offer_v1::{self, ZwlrDataControlOfferV1},
    zwlr_data_control_source_v1::{self, ZwlrDataControlSourceV1},
};

use crate::error::Error;
use crate::format::{Format, TEXT_ALIASES, select_mime};

pub(crate) struct WaylandBackend {
    conn: Connection,
    manager: ZwlrDataControlManagerV1,
    seat: WlSeat,
}

/// Dispatch target for the one-off initialization queue
struct SetupState;

impl Dispatch<WlRegistry, GlobalListContents> for SetupState {
    fn event(
        _state: &mut Self,
        _proxy: &WlRegistry,
        _event: <WlRegistry as wayland_client::Proxy>::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlSeat, ()> for SetupState {
    fn event(
        _state: &mut Self,
        _proxy: &WlSeat,
        event: <WlSeat as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wayland_client::protocol::wl_seat::Event::Name { name } = event {
            log::debug!("Bound wl_seat '{name}'");
        }
    }
}

impl Dispatch<ZwlrDataControlManagerV1, ()> for SetupState {
    fn event(
        _state: &mut Self,
        _proxy: &ZwlrDataControlManagerV1,
        _event: <ZwlrDataControlManagerV1 as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl WaylandBackend {
    /// Connect to the compositor and bind the seat and data-control manager
    ///
    /// Any failure here (no socket, no seat, compositor without the
    /// data-control extension) is `Unavailable`; the router falls back to
    /// X11 via XWayland.
    pub(crate) fn connect() -> Result<Self, Error> {
        let conn = Connection::connect_to_env()
            .map_err(|err| Error::unavailable(format!("failed to connect to compositor: {err}")))?;
        let (globals, mut queue) =
            registry_queue_init::<SetupState>(&conn).map_err(Error::unavailable)?;
        let qh = queue.handle();

        let manager: ZwlrDataControlManagerV1 = globals.bind(&qh, 1..=2, ()).map_err(|_| {
            Error::unavailable("compositor does not expose zwlr_data_control_manager_v1")
        })?;
        let seat: WlSeat = globals
            .bind(&qh, 1..=4, ())
            .map_err(|_| Error::unavailable("compositor has no wl_seat"))?;

        let mut state = SetupState;
        queue.roundtrip(&mut state).map_err(Error::unavailable)?;

        Ok(WaylandBackend {
            conn,
            manager,
            seat,
        })
    }

    pub(crate) fn read(&self, format: Format) -> Result<Vec<u8>, Error> {
        let mut queue = self.conn.new_event_queue::<ReadState>();
        let qh = queue.handle();
        let device = self.manager.get_data_device(&self.seat, &qh, ());

        // The compositor replays the current selection (offer announcement
        // plus its MIME list) to a freshly bound device during this
        // round-trip.
        let mut state = ReadState::default();
        let roundtrip = queue.roundtrip(&mut state).map_err(Error::unavailable);

        let result = roundtrip.and_then(|_| self.receive(&state, format));

        for offer in state.offers.keys() {
            offer.destroy();
        }
        device.destroy();
        let _ = self.conn.flush();

        result
    }

    fn receive(&self, state: &ReadState, format: Format) -> Result<Vec<u8>, Error> {
        let Some(offer) = &state.selection else {
            return Err(Error::unavailable("clipboard holds no selection"));
        };
        let announced = state.offers.get(offer).map(Vec::as_slice).unwrap_or(&[]);
        let Some(mime) = select_mime(format, announced) else {
            return Err(Error::unavailable(
                "clipboard owner offers no matching MIME type",
            ));
        };

        let (mut reader, writer) = os_pipe::pipe().map_err(Error::unavailable)?;
        offer.receive(mime.to_string(), writer.as_fd());
        // Close our copy of the write end right away so end-of-stream
        // arrives once the owner is done.
        drop(writer);
        self.conn.flush().map_err(Error::unavailable)?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(Error::unavailable)?;
        log::debug!("Received {} bytes as {mime}", data.len());
        Ok(data)
    }

    pub(crate) fn write(&self, format: Format, data: Vec<u8>) -> Result<mpsc::Receiver<()>, Error> {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (done_tx, done_rx) = mpsc::channel();

        // The queue and its state must live on the serving thread, so the
        // selection is installed there and the outcome reported back.
        let conn = self.conn.clone();
        let manager = self.manager.clone();
        let seat = self.seat.clone();
        thread::Builder::new()
            .name("selboard-wl-serve".into())
            .spawn(move || {
                match prepare_selection(&conn, &manager, &seat, format, data, done_tx) {
                    Ok((queue, state, device)) => {
                        let _ = ready_tx.send(None);
                        serve_source(queue, state, device);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Some(err));
                    }
                }
            })
            .map_err(Error::unavailable)?;

        match ready_rx.recv() {
            Ok(None) => Ok(done_rx),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(Error::unavailable("clipboard serving thread failed to start")),
        }
    }
}

/// Install a data source as the seat's selection and confirm it with the
/// compositor before the write call returns.
fn prepare_selection(
    conn: &Connection,
    manager: &ZwlrDataControlManagerV1,
    seat: &WlSeat,
    format: Format,
    data: Vec<u8>,
    done: mpsc::Sender<()>,
) -> Result<(EventQueue<WriteState>, WriteState, ZwlrDataControlDeviceV1), Error> {
    let mut queue = conn.new_event_queue::<WriteState>();
    let qh = queue.handle();
    let device = manager.get_data_device(seat, &qh, ());
    let source = manager.create_data_source(&qh, ());

    source.offer(format.mime_type().to_string());
    if format == Format::Text {
        // Legacy names maximize interoperability with older clients.
        for alias in TEXT_ALIASES {
            source.offer((*alias).to_string());
        }
    }
    device.set_selection(Some(&source));

    let mut state = WriteState {
        payload: Arc::new(data),
        cancelled: false,
        done: Some(done),
    };
    queue.roundtrip(&mut state).map_err(Error::unavailable)?;

    log::debug!(
        "Selection installed with {} bytes as {}",
        state.payload.len(),
        format.mime_type()
    );
    Ok((queue, state, device))
}

/// Detached dispatch loop serving `send` requests until the source is
/// cancelled (another client took the selection over).
fn serve_source(
    mut queue: EventQueue<WriteState>,
    mut state: WriteState,
    device: ZwlrDataControlDeviceV1,
) {
    while !state.cancelled {
        if let Err(err) = queue.blocking_dispatch(&mut state) {
            log::debug!("Wayland serving loop dispatch error: {err}");
            break;
        }
    }
    device.destroy();
}

struct WriteState {
    payload: Arc<Vec<u8>>,
    cancelled: bool,
    done: Option<mpsc::Sender<()>>,
}

impl Dispatch<ZwlrDataControlSourceV1, ()> for WriteState {
    fn event(
        state: &mut Self,
        source: &ZwlrDataControlSourceV1,
        event: <ZwlrDataControlSourceV1 as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_data_control_source_v1::Event::Send { mime_type, fd } => {
                log::debug!("Serving a paste request for {mime_type}");
                send_payload(Arc::clone(&state.payload), fd);
            }
            zwlr_data_control_source_v1::Event::Cancelled => {
                log::debug!("Selection superseded by another client");
                source.destroy();
                state.cancelled = true;
                if let Some(done) = state.done.take() {
                    let _ = done.send(());
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<ZwlrDataControlDeviceV1, ()> for WriteState {
    fn event(
        _state: &mut Self,
        _proxy: &ZwlrDataControlDeviceV1,
        event: <ZwlrDataControlDeviceV1 as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // A writer has no use for incoming offers (including the echo of
        // its own selection); release them immediately.
        if let zwlr_data_control_device_v1::Event::DataOffer { id } = event {
            id.destroy();
        }
    }

    event_created_child!(WriteState, ZwlrDataControlDeviceV1, [
        zwlr_data_control_device_v1::EVT_DATA_OFFER_OPCODE => (ZwlrDataControlOfferV1, ()),
    ]);
}

impl Dispatch<ZwlrDataControlOfferV1, ()> for WriteState {
    fn event(
        _state: &mut Self,
        _proxy: &ZwlrDataControlOfferV1,
        _event: <ZwlrDataControlOfferV1 as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

/// Write the payload to a paste requestor's descriptor off the dispatch
/// thread, so a slow reader cannot stall the serving loop.
fn send_payload(payload: Arc<Vec<u8>>, fd: OwnedFd) {
    let spawned = thread::Builder::new()
        .name("selboard-wl-send".into())
        .spawn(move || {
            let mut file = File::from(fd);
            if let Err(err) = file.write_all(&payload) {
                log::debug!("Paste requestor went away mid-transfer: {err}");
            }
            // fd closes when the file drops.
        });
    if let Err(err) = spawned {
        log::debug!("Failed to spawn transfer thread: {err}");
    }
}

#[derive(Default)]
struct ReadState {
    /// MIME types announced per pending offer
    offers: HashMap<ZwlrDataControlOfferV1, Vec<String>>,
    /// The offer currently installed as the seat's selection, if any
    selection: Option<ZwlrDataControlOfferV1>,
}

impl Dispatch<ZwlrDataControlDeviceV1, ()> for ReadState {
    fn event(
        state: &mut Self,
        _proxy: &ZwlrDataControlDeviceV1,
        event: <ZwlrDataControlDeviceV1 as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_data_control_device_v1::Event::DataOffer { id } => {
                state.offers.insert(id, Vec::new());
            }
            zwlr_data_control_device_v1::Event::Selection { id } => {
                state.selection = id;
            }
            zwlr_data_control_device_v1::Event::Finished => {
                log::debug!("Data-control device finished by the compositor");
                state.selection = None;
            }
            _ => {}
        }
    }

    event_created_child!(ReadState, ZwlrDataControlDeviceV1, [
        zwlr_data_control_device_v1::EVT_DATA_OFFER_OPCODE => (ZwlrDataControlOfferV1, ()),
    ]);
}

impl Dispatch<ZwlrDataControlOfferV1, ()> for ReadState {
    fn event(
        state: &mut Self,
        offer: &ZwlrDataControlOfferV1,
        event: <ZwlrDataControlOfferV1 as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zwlr_data_control_offer_v1::Event::Offer { mime_type } = event {
            if let Some(types) = state.offers.get_mut(offer) {
                types.push(mime_type);
            }
        }
    }
}
