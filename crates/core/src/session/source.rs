//! RTSP listener for the Miracast source role.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::session::client::{ProtocolEngine, SourceClient};

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builds a protocol engine for a freshly accepted sink connection.
/// The client handle doubles as the engine's
/// [`RtspPeer`](crate::session::RtspPeer) side.
pub type EngineFactory = Arc<dyn Fn(Arc<SourceClient>) -> Box<dyn ProtocolEngine> + Send + Sync>;

/// Accepts the sink's RTSP control connection.
///
/// Miracast is point-to-point: exactly one sink talks to a source at a
/// time, so while a client is active further connections are dropped on
/// accept.
pub struct Source {
    running: Arc<AtomicBool>,
    client: Arc<Mutex<Option<Arc<SourceClient>>>>,
    local_addr: SocketAddr,
}

impl Source {
    /// Bind `bind_addr` (normally the well-known RTSP port
    /// [`RTSP_PORT`](crate::session::client::RTSP_PORT)) and start
    /// accepting.
    pub fn start(bind_addr: &str, engine_factory: EngineFactory) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let client = Arc::new(Mutex::new(None::<Arc<SourceClient>>));

        tracing::info!(addr = %local_addr, "RTSP source listening");

        {
            let running = running.clone();
            let client_slot = client.clone();
            thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            let mut slot = client_slot.lock();
                            if slot.as_ref().is_some_and(|client| client.running()) {
                                tracing::warn!(%peer, "sink already connected, dropping connection");
                                continue;
                            }

                            if stream.set_nonblocking(false).is_err() {
                                continue;
                            }
                            let local_ip = match stream.local_addr() {
                                Ok(addr) => addr.ip(),
                                Err(_) => continue,
                            };

                            match SourceClient::new(stream, local_ip) {
                                Ok(new_client) => {
                                    let engine = engine_factory(new_client.clone());
                                    if let Err(e) = new_client.start(engine) {
                                        tracing::warn!(%peer, error = %e, "failed to start client");
                                        continue;
                                    }
                                    *slot = Some(new_client);
                                }
                                Err(e) => {
                                    tracing::warn!(%peer, error = %e, "failed to set up client");
                                }
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                tracing::warn!(error = %e, "accept error");
                            }
                        }
                    }
                }
                tracing::debug!("accept loop exited");
            });
        }

        Ok(Self {
            running,
            client,
            local_addr,
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.lock().take() {
            client.stop();
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The currently connected sink, if any.
    pub fn client(&self) -> Option<Arc<SourceClient>> {
        self.client.lock().clone()
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.stop();
    }
}
