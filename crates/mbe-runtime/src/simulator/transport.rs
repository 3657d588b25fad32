//! Framed TCP endpoint for the virtual controller (one thread per client).

use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::codec::{read_frame, write_frame, REPLY_PASSWORD};
use crate::error::MbeError;

use super::{handle_command, SharedSimulator};

const LOGIN_MARKER: &str = "Client:";

struct ServerState {
    simulator: SharedSimulator,
    password: SmolStr,
    shutdown: AtomicBool,
    next_client: AtomicU64,
    /// Open client sockets by connection id, kept so `stop` can cut them.
    clients: Mutex<IndexMap<u64, TcpStream>>,
}

/// Running virtual controller server. Dropping it shuts it down.
pub struct VirtualServer {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    accept: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for VirtualServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl VirtualServer {
    pub fn bind(
        addr: &str,
        simulator: SharedSimulator,
        password: impl Into<SmolStr>,
    ) -> Result<Self, MbeError> {
        let listener = TcpListener::bind(addr)
            .map_err(|err| MbeError::Connection(format!("bind {addr}: {err}").into()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| MbeError::connection("local address", &err))?;
        let state = Arc::new(ServerState {
            simulator,
            password: password.into(),
            shutdown: AtomicBool::new(false),
            next_client: AtomicU64::new(0),
            clients: Mutex::new(IndexMap::new()),
        });
        let accept_state = state.clone();
        let accept = thread::Builder::new()
            .name("mbe-virtual-accept".into())
            .spawn(move || accept_loop(&listener, &accept_state))
            .map_err(|err| MbeError::ThreadSpawn(format!("accept loop: {err}").into()))?;
        info!(%local_addr, "virtual controller listening");
        Ok(Self {
            local_addr,
            state,
            accept: Some(accept),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn simulator(&self) -> &SharedSimulator {
        &self.state.simulator
    }

    /// Clients currently connected.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.state.clients.lock().len()
    }

    /// Block until the accept loop exits.
    pub fn join(mut self) {
        if let Some(handle) = self.accept.take() {
            if handle.join().is_err() {
                warn!("virtual controller accept loop panicked");
            }
        }
    }

    /// Stop accepting, disconnect every client, and wait for the accept loop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.state.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.local_addr);
        for (_, client) in self.state.clients.lock().drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.accept.take() {
            if handle.join().is_err() {
                warn!("virtual controller accept loop panicked");
            }
        }
        info!(local_addr = %self.local_addr, "virtual controller stopped");
    }
}

impl Drop for VirtualServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: &TcpListener, state: &Arc<ServerState>) {
    for stream in listener.incoming() {
        if state.shutdown.load(Ordering::Acquire) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().map(|addr| addr.to_string()).unwrap_or_default();
        let id = state.next_client.fetch_add(1, Ordering::Relaxed);
        if let Ok(clone) = stream.try_clone() {
            state.clients.lock().insert(id, clone);
        }
        let client_state = state.clone();
        let spawned = thread::Builder::new()
            .name("mbe-virtual-client".into())
            .spawn(move || {
                handle_client(stream, &client_state, &peer);
                client_state.clients.lock().shift_remove(&id);
            });
        if let Err(err) = spawned {
            warn!(%err, "cannot spawn client thread");
            state.clients.lock().shift_remove(&id);
        }
    }
}

fn handle_client(mut stream: TcpStream, state: &ServerState, peer: &str) {
    let _ = stream.set_nodelay(true);
    let authenticated = match read_frame(&mut stream) {
        Ok(login) => check_login(&login, &state.password),
        Err(err) => {
            debug!(peer, %err, "client left before login");
            return;
        }
    };
    if authenticated {
        info!(peer, "client logged in");
    } else {
        warn!(peer, "client rejected: wrong password");
    }
    loop {
        let payload = match read_frame(&mut stream) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(peer, %err, "client disconnected");
                break;
            }
        };
        let text = String::from_utf8_lossy(&payload);
        let frames = match text.strip_prefix(state.password.as_str()) {
            Some(command) if authenticated => {
                let mut mbe = state.simulator.lock();
                handle_command(&mut mbe, command).frames()
            }
            _ => vec![REPLY_PASSWORD.to_string()],
        };
        for frame in frames {
            if let Err(err) = write_frame(&mut stream, frame.as_bytes()) {
                debug!(peer, %err, "reply failed");
                return;
            }
        }
    }
}

fn check_login(payload: &[u8], password: &str) -> bool {
    let text = String::from_utf8_lossy(payload);
    text.strip_prefix(password)
        .is_some_and(|rest| rest.starts_with(LOGIN_MARKER))
}
