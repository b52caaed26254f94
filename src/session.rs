//! The PTP/IP state machine (§4.3): handshake, SDIO vendor setup,
//! transaction-correlated operations, keep-alive, and event handling.
//!
//! `Session` is the sole owner of both sockets, the transaction counter, and
//! the connection-phase state. The command channel is guarded by a mutex
//! that keep-alive, live-view polling, and foreground operations all
//! contend for; this is the "one logical executor" the design calls for,
//! implemented with a thread-per-session plus blocking I/O (§9 endorses
//! this shape explicitly).

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::codec;
use crate::error::{PtpError, Result};
use crate::packet::{self, PacketHeader, PacketType};
use crate::transport::{Channel, READ_TIMEOUT};

/// PTP/IP listens on 15740 on both the command and event TCP connections.
pub const PORT: u16 = 15740;

/// Keep-alive cadence while `Ready` (§4.3).
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Live-view polling cadence: ~30 fps on success, with a longer backoff on
/// error (§5). These are tunables for a caller-driven polling loop — the
/// session itself only exposes a pull-based `read` per operation; nothing
/// inside this crate spins its own poll thread.
pub const LIVE_VIEW_POLL_INTERVAL: Duration = Duration::from_millis(33);
pub const LIVE_VIEW_BACKOFF: Duration = Duration::from_millis(100);

/// Tunables that don't warrant a config file (§6: "Persisted state: None").
/// Every field has a spec-literal default; callers who want different
/// values build one directly and pass it to
/// [`Session::connect_with_config`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Sent as InitCommandRequest's friendly name (§6: "any
    /// implementation-chosen value").
    pub friendly_name: String,
    pub keepalive_interval: Duration,
    pub live_view_poll_interval: Duration,
    pub live_view_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            friendly_name: "sdio-ptpip".to_string(),
            keepalive_interval: KEEPALIVE_INTERVAL,
            live_view_poll_interval: LIVE_VIEW_POLL_INTERVAL,
            live_view_backoff: LIVE_VIEW_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Ready,
    Closing,
    Disconnected,
}

/// Shared state the background threads and foreground calls all read.
struct Shared {
    cmd: Mutex<Channel>,
    phase: Mutex<Phase>,
    txn: AtomicU32,
    refresh_pending: AtomicBool,
    stopping: AtomicBool,
    keepalive_interval: Duration,
    /// Cloned handle to the event socket, used only to force it closed from
    /// `disconnect()` so the event reader's blocking `recv` wakes up
    /// immediately instead of waiting out its read timeout.
    event_shutdown: Option<TcpStream>,
}

/// An established PTP/IP session, past the handshake and SDIO setup.
pub struct Session {
    shared: Arc<Shared>,
    keepalive: Option<JoinHandle<()>>,
    event_reader: Option<JoinHandle<()>>,
}

impl Session {
    /// Run the full state machine (`Connecting` through `SdioSetup`) with
    /// the default [`Config`]. Any failure along the way is fatal: no
    /// partial session is returned.
    pub fn connect(ip: &str) -> Result<Self> {
        Self::connect_with_config(ip, &Config::default())
    }

    /// As [`Self::connect`], with caller-supplied tunables.
    pub fn connect_with_config(ip: &str, config: &Config) -> Result<Self> {
        let addr: SocketAddr = format!("{ip}:{PORT}")
            .parse()
            .map_err(|_| PtpError::InvalidArgument(format!("invalid camera address: {ip}")))?;

        debug!("connecting command channel to {addr}");
        let mut cmd = Channel::connect(addr)?;

        let guid = random_guid();
        cmd.send(&codec::init_command_request(&guid, &config.friendly_name))?;
        let ack = cmd.recv(READ_TIMEOUT)?;
        expect_packet(&ack, PacketType::InitCommandAck, "init_command")?;
        let connection_id = codec::read_u32(&ack, 8)?;
        trace!("InitCommandAck connection_id=0x{connection_id:08X}");

        debug!("connecting event channel to {addr}");
        let mut event = Channel::connect(addr)?;
        event.send(&codec::init_event_request(connection_id))?;
        let ack = event.recv(READ_TIMEOUT)?;
        expect_packet(&ack, PacketType::InitEventAck, "init_event")?;

        let event_shutdown = event.try_clone_stream().ok();

        let shared = Arc::new(Shared {
            cmd: Mutex::new(cmd),
            phase: Mutex::new(Phase::Ready),
            txn: AtomicU32::new(0),
            refresh_pending: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            keepalive_interval: config.keepalive_interval,
            event_shutdown,
        });

        Self::open_session(&shared)?;
        Self::sdio_setup(&shared)?;

        let event_reader = Some(spawn_event_reader(Arc::clone(&shared), event));
        let keepalive = Some(spawn_keepalive(Arc::clone(&shared)));

        Ok(Self { shared, keepalive, event_reader })
    }

    fn open_session(shared: &Arc<Shared>) -> Result<()> {
        let session_id = random_session_id();
        let (_, code, _) = run_step(shared, packet::OP_OPEN_SESSION, &[session_id])?;
        match code {
            packet::RESP_OK | packet::RESP_SESSION_ALREADY_OPEN => Ok(()),
            other => Err(PtpError::HandshakeFailed {
                stage: "open_session",
                reason: format!("unexpected response code 0x{other:04X}"),
            }),
        }
    }

    fn sdio_setup(shared: &Arc<Shared>) -> Result<()> {
        const STEPS: &[(&str, u16, &[u32])] = &[
            ("get_device_info", packet::OP_GET_DEVICE_INFO, &[]),
            ("get_storage_ids", packet::OP_GET_STORAGE_IDS, &[]),
            ("sdio_connect_1", packet::OP_SDIO_CONNECT, &[1]),
            ("sdio_connect_2", packet::OP_SDIO_CONNECT, &[2]),
            ("sdio_connect_3", packet::OP_SDIO_CONNECT, &[3]),
            ("sdio_get_ext_device_info", packet::OP_SDIO_GET_EXT_DEVICE_INFO, &[0x00C8]),
        ];
        for &(stage, opcode, params) in STEPS {
            let (_, code, _) = run_step(shared, opcode, params)?;
            if code != packet::RESP_OK {
                return Err(PtpError::HandshakeFailed {
                    stage,
                    reason: format!("response code 0x{code:04X}"),
                });
            }
        }
        Ok(())
    }

    /// True once `Ready` has been reached and before teardown begins.
    pub fn is_ready(&self) -> bool {
        *self.shared.phase.lock().unwrap() == Phase::Ready
    }

    /// Issue a commandless operation and return `(response_code, params)`.
    pub fn command(&self, opcode: u16, params: &[u32]) -> Result<(u16, Vec<u32>)> {
        self.guard_ready()?;
        let (_, code, params) = run_step(&self.shared, opcode, params)?;
        Ok((code, params))
    }

    /// Issue an operation with an outbound data phase (`SdioControlDevice`
    /// writes): OperationRequest(phase=2), StartData, EndData, then await
    /// the response.
    pub fn write(&self, opcode: u16, params: &[u32], payload: &[u8]) -> Result<(u16, Vec<u32>)> {
        self.guard_ready()?;
        let mut cmd = self.lock_cmd()?;
        let txn = self.shared.txn.fetch_add(1, Ordering::SeqCst) + 1;

        cmd.send(&codec::operation_request(opcode, txn, params, true))?;
        cmd.send(&codec::start_data(txn, payload.len() as u64))?;
        cmd.send(&codec::end_data(txn, payload))?;

        let (_, code, resp_params) = collect_until_response(&mut cmd)?;
        Ok((code, resp_params))
    }

    /// Issue an operation with an inbound data phase (`GetObject`,
    /// `SdioGetAllExtDevicePropInfo`): send the request, collect any
    /// `Data`/`EndData` payload, then await the response.
    pub fn read(&self, opcode: u16, params: &[u32]) -> Result<(Vec<u8>, u16, Vec<u32>)> {
        self.guard_ready()?;
        run_step(&self.shared, opcode, params)
    }

    /// True if an event-channel notification arrived since the last call;
    /// clears the flag. The Device API polls this to know when to reissue
    /// `SdioGetAllExtDevicePropInfo`.
    pub fn take_refresh_pending(&self) -> bool {
        self.shared.refresh_pending.swap(false, Ordering::SeqCst)
    }

    fn guard_ready(&self) -> Result<()> {
        if *self.shared.phase.lock().unwrap() != Phase::Ready {
            return Err(PtpError::NotConnected);
        }
        Ok(())
    }

    fn lock_cmd(&self) -> Result<MutexGuard<'_, Channel>> {
        self.shared.cmd.lock().map_err(|_| PtpError::ConnectionLost)
    }

    /// Tear the session down: stop keep-alive and the event reader, close
    /// both sockets. Idempotent.
    pub fn disconnect(&mut self) {
        *self.shared.phase.lock().unwrap() = Phase::Closing;
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Ok(cmd) = self.shared.cmd.lock() {
            cmd.shutdown();
        }
        if let Some(event) = self.shared.event_shutdown.as_ref() {
            let _ = event.shutdown(std::net::Shutdown::Both);
        }
        if let Some(h) = self.keepalive.take() {
            let _ = h.join();
        }
        if let Some(h) = self.event_reader.take() {
            let _ = h.join();
        }
        *self.shared.phase.lock().unwrap() = Phase::Disconnected;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Run one request/collect/response cycle for an operation whose request
/// declares `data_phase=1` (commandless or inbound-data-phase per §4.3 —
/// both declare the same phase indicator on the request itself).
fn run_step(shared: &Arc<Shared>, opcode: u16, params: &[u32]) -> Result<(Vec<u8>, u16, Vec<u32>)> {
    let mut cmd = shared.cmd.lock().map_err(|_| PtpError::ConnectionLost)?;
    let txn = shared.txn.fetch_add(1, Ordering::SeqCst) + 1;
    cmd.send(&codec::operation_request(opcode, txn, params, false))?;
    collect_until_response(&mut cmd)
}

/// Read packets from the command channel until `OperationResponse` arrives,
/// assembling any `Data`/`EndData` payload along the way. `StartData`'s
/// announced size is advisory only (§9) and is not used to size the
/// accumulator. Packet types other than `StartData`/`Data`/`EndData`/
/// `OperationResponse` are discarded, per §4.3.
fn collect_until_response(cmd: &mut Channel) -> Result<(Vec<u8>, u16, Vec<u32>)> {
    let mut payload = Vec::new();
    loop {
        let wire = cmd.recv(READ_TIMEOUT)?;
        let hdr = PacketHeader::parse(&wire)?;
        match hdr.packet_type()? {
            PacketType::StartData => {}
            PacketType::Data | PacketType::EndData => {
                if wire.len() > 12 {
                    payload.extend_from_slice(&wire[12..]);
                }
            }
            PacketType::OperationResponse => {
                return parse_operation_response(&wire).map(|(code, params)| (payload, code, params));
            }
            other => {
                trace!("discarding unsolicited packet {other:?} on command channel");
            }
        }
    }
}

/// Parse `OperationResponse`'s body. The response code sits at a fixed
/// offset (10) per the external contract; two reserved bytes precede it,
/// and a 32-bit transaction id (unused — the channel is already serialised,
/// §4.3) follows, then zero or more `u32` parameters.
fn parse_operation_response(wire: &[u8]) -> Result<(u16, Vec<u32>)> {
    let code = codec::read_u16(wire, 10)?;
    let mut params = Vec::new();
    let mut offset = 16;
    while offset + 4 <= wire.len() {
        params.push(codec::read_u32(wire, offset)?);
        offset += 4;
    }
    Ok((code, params))
}

/// Check that a received packet has the expected type, turning any mismatch
/// (wrong type, truncated header, unknown type) into a `HandshakeFailed` at
/// the named stage.
fn expect_packet(wire: &[u8], expected: PacketType, stage: &'static str) -> Result<()> {
    let hdr = PacketHeader::parse(wire).map_err(|e| PtpError::HandshakeFailed {
        stage,
        reason: e.to_string(),
    })?;
    let got = hdr.packet_type().map_err(|e| PtpError::HandshakeFailed {
        stage,
        reason: e.to_string(),
    })?;
    if got != expected {
        return Err(PtpError::HandshakeFailed {
            stage,
            reason: format!("expected {expected:?}, got {got:?}"),
        });
    }
    Ok(())
}

fn spawn_keepalive(shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shared.stopping.load(Ordering::SeqCst) {
            std::thread::sleep(shared.keepalive_interval);
            if shared.stopping.load(Ordering::SeqCst) {
                break;
            }
            if *shared.phase.lock().unwrap() != Phase::Ready {
                break;
            }
            // Lowest priority: skip this tick rather than queue behind an
            // in-flight operation (§5).
            if let Ok(mut cmd) = shared.cmd.try_lock() {
                if cmd.send(&codec::probe_request()).is_err() {
                    warn!("keep-alive probe failed to send; leaving teardown to the caller");
                }
            } else {
                trace!("keep-alive skipped: command channel busy");
            }
        }
    })
}

fn spawn_event_reader(shared: Arc<Shared>, mut event: Channel) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shared.stopping.load(Ordering::SeqCst) {
            match event.recv(READ_TIMEOUT) {
                Ok(wire) => {
                    if let Ok(hdr) = PacketHeader::parse(&wire) {
                        if hdr.packet_type() == Ok(PacketType::Event) {
                            shared.refresh_pending.store(true, Ordering::SeqCst);
                        }
                    }
                }
                Err(PtpError::Timeout(_)) => continue,
                Err(_) => break,
            }
        }
        event.shutdown();
    })
}

fn random_guid() -> [u8; 16] {
    rand::random()
}

/// A random non-zero 24-bit session id, per §4.3.
fn random_session_id() -> u32 {
    let candidate = rand::random::<u32>() & 0x00FF_FFFF;
    if candidate == 0 { 1 } else { candidate }
}
