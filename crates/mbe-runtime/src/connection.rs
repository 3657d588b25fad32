//! Authenticated controller connection with a keep-alive heartbeat.
//!
//! Exactly one command is in flight per connection. Foreground callers block
//! on the command lock; the heartbeat only ever tries the lock and skips its
//! turn when a command is running.

#![allow(missing_docs)]

mod keepalive;

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::codec::{read_frame, write_frame, Reply, REPLY_OK};
use crate::error::MbeError;

use keepalive::KeepAlive;

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub address: SmolStr,
    pub password: SmolStr,
    pub client_name: SmolStr,
    pub keepalive: Duration,
    /// Connect and socket read/write timeout; `None` blocks indefinitely.
    pub timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<SmolStr>, password: impl Into<SmolStr>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            client_name: SmolStr::new_inline("recipe"),
            keepalive: DEFAULT_KEEPALIVE,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.client_name = name.into();
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }
}

/// State shared between the foreground and the heartbeat thread.
#[derive(Debug)]
pub(crate) struct Channel {
    stream: Mutex<TcpStream>,
    /// Clone of the socket used to shut it down without taking the lock.
    control: TcpStream,
    password: SmolStr,
    closed: AtomicBool,
}

impl Channel {
    fn send_command(&self, cmd: &str) -> Result<String, MbeError> {
        self.ensure_open()?;
        let mut stream = self.stream.lock();
        exchange(&mut stream, &self.password, cmd)
    }

    /// `None` when another command holds the lock.
    pub(crate) fn try_send_command(&self, cmd: &str) -> Option<Result<String, MbeError>> {
        if self.closed.load(Ordering::Acquire) {
            return Some(Err(closed_error()));
        }
        let mut stream = self.stream.try_lock()?;
        Some(exchange(&mut stream, &self.password, cmd))
    }

    fn ensure_open(&self) -> Result<(), MbeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        Ok(())
    }
}

fn closed_error() -> MbeError {
    MbeError::Connection("connection closed".into())
}

fn exchange(stream: &mut TcpStream, password: &str, cmd: &str) -> Result<String, MbeError> {
    let mut payload = String::with_capacity(password.len() + cmd.len());
    payload.push_str(password);
    payload.push_str(cmd);
    write_frame(stream, payload.as_bytes())?;
    receive(stream)
}

/// Read the reply to one command. `WAIT` means the controller is still busy:
/// keep reading without resending. Text before any `WAIT` is an error reply.
fn receive(stream: &mut TcpStream) -> Result<String, MbeError> {
    let mut after_wait = false;
    loop {
        let payload = read_frame(stream)?;
        match Reply::classify(&payload) {
            Reply::Ok => return Ok(REPLY_OK.to_string()),
            Reply::Empty => return Ok(String::new()),
            Reply::Wait => after_wait = true,
            Reply::Password => return Err(MbeError::Authentication),
            Reply::Text(text) if after_wait => return Ok(text),
            Reply::Text(text) => return Err(MbeError::Protocol(text.into())),
        }
    }
}

/// One authenticated session to the controller.
#[derive(Debug)]
pub struct Connection {
    channel: Arc<Channel>,
    keepalive: Mutex<Option<KeepAlive>>,
    peer: SocketAddr,
    chamber: SmolStr,
    description: String,
}

impl Connection {
    pub fn connect(config: &ConnectionConfig) -> Result<Self, MbeError> {
        let stream = open_stream(config)?;
        let peer = stream
            .peer_addr()
            .map_err(|err| MbeError::connection("peer address", &err))?;
        let control = stream
            .try_clone()
            .map_err(|err| MbeError::connection("clone socket", &err))?;
        let channel = Arc::new(Channel {
            stream: Mutex::new(stream),
            control,
            password: config.password.clone(),
            closed: AtomicBool::new(false),
        });

        {
            let mut stream = channel.stream.lock();
            let login = format!("{}Client:{}", config.password, config.client_name);
            write_frame(&mut *stream, login.as_bytes())?;
        }
        let description = channel.send_command("get this.config")?;
        let chamber = SmolStr::new(channel.send_command("get this.chamber")?);
        info!(%peer, %chamber, client = %config.client_name, "connected to controller");

        let keepalive = KeepAlive::spawn(channel.clone(), config.keepalive)?;
        Ok(Self {
            channel,
            keepalive: Mutex::new(Some(keepalive)),
            peer,
            chamber,
            description,
        })
    }

    /// Send one command and return its reply text.
    pub fn send_command(&self, cmd: &str) -> Result<String, MbeError> {
        debug!(cmd, "send command");
        self.channel.send_command(cmd).inspect_err(|err| {
            warn!(cmd, %err, "command failed");
        })
    }

    #[must_use]
    pub fn chamber(&self) -> &str {
        &self.chamber
    }

    /// Parameter-set description received during the handshake.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.closed.load(Ordering::Acquire)
    }

    /// Stop the heartbeat and close the socket. Safe to call repeatedly.
    pub fn close(&self) -> Result<(), MbeError> {
        if self.channel.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let keepalive = self.keepalive.lock().take();
        let shutdown = self.channel.control.shutdown(Shutdown::Both);
        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
        info!(peer = %self.peer, "connection closed");
        match shutdown {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(MbeError::connection("shutdown", &err)),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "closing connection on drop");
        }
    }
}

fn open_stream(config: &ConnectionConfig) -> Result<TcpStream, MbeError> {
    let addrs: Vec<SocketAddr> = config
        .address
        .as_str()
        .to_socket_addrs()
        .map_err(|err| MbeError::Connection(format!("resolve {}: {err}", config.address).into()))?
        .collect();
    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let _ = stream.set_read_timeout(config.timeout);
                let _ = stream.set_write_timeout(config.timeout);
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => MbeError::Connection(format!("connect {}: {err}", config.address).into()),
        None => MbeError::Connection(format!("no address for {}", config.address).into()),
    })
}
