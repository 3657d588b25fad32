//! Periodic no-op ping that keeps an idle controller session alive.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::codec::REPLY_OK;
use crate::error::MbeError;

use super::Channel;

#[derive(Debug)]
pub(crate) struct KeepAlive {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub(crate) fn spawn(channel: Arc<Channel>, interval: Duration) -> Result<Self, MbeError> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("mbe-keepalive".into())
            .spawn(move || run(&channel, interval, &stop_rx))
            .map_err(|err| MbeError::ThreadSpawn(format!("keep-alive: {err}").into()))?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Wake the heartbeat and wait for it to exit.
    pub(crate) fn stop(mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("keep-alive thread panicked");
            }
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        // Disconnecting the stop channel is enough to end the loop.
        self.stop.take();
    }
}

fn run(channel: &Channel, interval: Duration, stop: &Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => ping(channel),
        }
    }
    trace!("keep-alive stopped");
}

fn ping(channel: &Channel) {
    if channel.closed.load(Ordering::Acquire) {
        return;
    }
    match channel.try_send_command(REPLY_OK) {
        None => debug!("command in flight, skipping keep-alive ping"),
        Some(Ok(reply)) if reply == REPLY_OK => trace!("keep-alive ok"),
        Some(Ok(reply)) => warn!(%reply, "unexpected answer to keep-alive ping"),
        Some(Err(err)) => warn!(%err, "keep-alive ping failed"),
    }
}
