//! RTSP control-channel client: ferries bytes between the sink's TCP
//! connection and the external WFD protocol engine.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::session::timer::DelayedCall;

/// Well-known Wi-Fi Display RTSP control port.
pub const RTSP_PORT: u16 = 7236;

/// The external WFD protocol engine driving the RTSP M1..M16 exchange.
///
/// The engine receives inbound RTSP bytes unmodified and talks back
/// through the [`RtspPeer`] handle it was constructed with.
pub trait ProtocolEngine: Send {
    fn start(&mut self) -> Result<()>;

    /// One chunk of inbound RTSP data, as received from the socket.
    fn rtsp_data_received(&mut self, data: &str);

    /// A timer created via [`RtspPeer::create_timer`] fired.
    fn on_timer_event(&mut self, timer_id: u32);
}

/// What the client offers a protocol engine.
pub trait RtspPeer: Send + Sync {
    /// Write outbound RTSP bytes to the sink.
    fn send_rtsp_data(&self, data: &str);

    /// Local address of the control connection, for RTSP headers.
    fn local_ip_address(&self) -> IpAddr;

    /// Monotonic CSeq counter for requests the source originates.
    fn next_cseq(&self) -> u32;

    /// Arm a one-shot timer; fires [`ProtocolEngine::on_timer_event`].
    fn create_timer(&self, timeout: Duration) -> u32;

    fn release_timer(&self, timer_id: u32);
}

/// Observer for control-connection loss.
pub trait ClientDelegate: Send + Sync {
    fn on_connection_closed(&self);
}

/// One sink connection on the RTSP control port.
///
/// A reader thread forwards inbound bytes to the engine; outbound
/// writes go straight to the socket. With `MIRACAST_RTSP_DEBUG` set in
/// the environment, both directions are dumped line-by-line to the log.
pub struct SourceClient {
    stream: TcpStream,
    peer_address: SocketAddr,
    local_address: IpAddr,
    engine: Arc<Mutex<Option<Box<dyn ProtocolEngine>>>>,
    delegate: Mutex<Option<Weak<dyn ClientDelegate>>>,
    send_cseq: AtomicU32,
    timers: Mutex<HashMap<u32, DelayedCall>>,
    next_timer_id: AtomicU32,
    running: Arc<AtomicBool>,
    rtsp_debug: bool,
    weak_self: Weak<SourceClient>,
}

impl SourceClient {
    pub fn new(stream: TcpStream, local_address: IpAddr) -> Result<Arc<Self>> {
        let peer_address = stream.peer_addr()?;
        let rtsp_debug = std::env::var_os("MIRACAST_RTSP_DEBUG").is_some();

        Ok(Arc::new_cyclic(|weak_self| Self {
            stream,
            peer_address,
            local_address,
            engine: Arc::new(Mutex::new(None)),
            delegate: Mutex::new(None),
            send_cseq: AtomicU32::new(0),
            timers: Mutex::new(HashMap::new()),
            next_timer_id: AtomicU32::new(1),
            running: Arc::new(AtomicBool::new(false)),
            rtsp_debug,
            weak_self: weak_self.clone(),
        }))
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.peer_address
    }

    pub fn set_delegate(&self, delegate: Weak<dyn ClientDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    /// Attach the protocol engine and begin ferrying RTSP data.
    pub fn start(&self, engine: Box<dyn ProtocolEngine>) -> Result<()> {
        {
            let mut slot = self.engine.lock();
            *slot = Some(engine);
            if let Some(engine) = slot.as_mut() {
                engine.start()?;
            }
        }

        self.running.store(true, Ordering::SeqCst);

        let reader = self.stream.try_clone()?;
        let running = self.running.clone();
        let engine = self.engine.clone();
        let weak = self.weak_self.clone();
        let peer = self.peer_address;

        thread::spawn(move || {
            tracing::info!(%peer, "sink connected on RTSP channel");
            let mut reader = reader;
            let mut buf = [0u8; 1024];

            while running.load(Ordering::SeqCst) {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if let Some(client) = weak.upgrade() {
                            client.dump_rtsp("IN", &data);
                        }
                        if let Some(engine) = engine.lock().as_mut() {
                            engine.rtsp_data_received(&data);
                        }
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            tracing::info!(%peer, "sink disconnected from RTSP channel");
            if let Some(client) = weak.upgrade() {
                client.release_timers();
                if let Some(delegate) = client.delegate.lock().as_ref().and_then(Weak::upgrade) {
                    delegate.on_connection_closed();
                }
            }
        });

        Ok(())
    }

    /// Close the connection; unblocks the reader thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
        self.release_timers();
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn release_timers(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.cancel();
        }
    }

    fn dump_rtsp(&self, direction: &str, data: &str) {
        if !self.rtsp_debug {
            return;
        }
        for line in data.lines() {
            tracing::debug!(direction, line, "RTSP");
        }
    }
}

impl RtspPeer for SourceClient {
    fn send_rtsp_data(&self, data: &str) {
        self.dump_rtsp("OUT", data);
        if let Err(e) = (&self.stream).write_all(data.as_bytes()) {
            tracing::warn!(peer = %self.peer_address, error = %e, "failed to write RTSP data");
        }
    }

    fn local_ip_address(&self) -> IpAddr {
        self.local_address
    }

    fn next_cseq(&self) -> u32 {
        self.send_cseq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn create_timer(&self, timeout: Duration) -> u32 {
        let timer_id = self.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let engine = self.engine.clone();
        let weak = self.weak_self.clone();

        let timer = DelayedCall::schedule(timeout, move || {
            if let Some(engine) = engine.lock().as_mut() {
                engine.on_timer_event(timer_id);
            }
            if let Some(client) = weak.upgrade() {
                client.timers.lock().remove(&timer_id);
            }
        });

        self.timers.lock().insert(timer_id, timer);
        timer_id
    }

    fn release_timer(&self, timer_id: u32) {
        if let Some(timer) = self.timers.lock().remove(&timer_id) {
            timer.cancel();
        }
    }
}
