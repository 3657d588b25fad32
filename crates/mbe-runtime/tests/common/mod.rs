#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mbe_runtime::codec::{read_frame, write_frame};
use mbe_runtime::param::{Button, ParamValue, ShutterState};
use mbe_runtime::{MbeError, ParameterStore};

const PAUSE_MARKER: &str = "<pause ms>";

/// Recorded in place of a frame when the client wrote while a reply was
/// paused mid-way.
pub const SENT_DURING_PAUSE: &str = "<sent during pause>";

/// Reply entry that makes the server sleep instead of sending a frame.
pub fn pause(duration: Duration) -> String {
    format!("{PAUSE_MARKER}{}", duration.as_millis())
}

/// Single-client loopback server answering each frame through `reply`.
/// Every frame received (login included) is recorded in order.
pub struct FrameServer {
    pub addr: SocketAddr,
    pub frames: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl FrameServer {
    pub fn spawn<F>(mut reply: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let frames = Arc::new(Mutex::new(Vec::new()));
        let seen = frames.clone();
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let Ok(login) = read_frame(&mut stream) else {
                return;
            };
            seen.lock()
                .expect("frames lock")
                .push(String::from_utf8_lossy(&login).into_owned());
            while let Ok(payload) = read_frame(&mut stream) {
                let text = String::from_utf8_lossy(&payload).into_owned();
                seen.lock().expect("frames lock").push(text.clone());
                for frame in reply(&text) {
                    if let Some(millis) = frame.strip_prefix(PAUSE_MARKER) {
                        let millis = millis.parse().expect("pause millis");
                        thread::sleep(Duration::from_millis(millis));
                        if has_pending_input(&stream) {
                            seen.lock()
                                .expect("frames lock")
                                .push(SENT_DURING_PAUSE.to_string());
                        }
                        continue;
                    }
                    if write_frame(&mut stream, frame.as_bytes()).is_err() {
                        return;
                    }
                }
            }
        });
        Self {
            addr,
            frames,
            handle: Some(handle),
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().expect("frames lock").clone()
    }

    /// Wait for the client to hang up.
    pub fn join(mut self) -> Vec<String> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("frame server thread");
        }
        self.frames()
    }
}

fn has_pending_input(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut byte = [0u8; 1];
    let pending = matches!(stream.peek(&mut byte), Ok(read) if read > 0);
    stream.set_nonblocking(false).expect("restore blocking mode");
    pending
}

/// Handshake replies a well-behaved controller gives, `password` stripped.
pub fn handshake(command: &str) -> Option<Vec<String>> {
    match command {
        "get this.config" => Some(wait_value("time:counter\nmanip.pv:float")),
        "get this.chamber" => Some(wait_value("test-chamber")),
        _ => None,
    }
}

pub fn wait_value(value: &str) -> Vec<String> {
    vec!["WAIT".to_string(), value.to_string()]
}

/// In-memory store with a scripted sequence of readings per parameter.
/// Time only moves through `wait`.
#[derive(Default)]
pub struct ScriptedStore {
    state: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    values: HashMap<String, f64>,
    scripts: HashMap<String, VecDeque<f64>>,
    elapsed: f64,
    waits: Vec<f64>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, name: &str, value: f64) -> Self {
        self.lock().values.insert(name.to_ascii_lowercase(), value);
        self
    }

    /// Readings returned one per `get_param`; the last one repeats.
    pub fn with_script(self, name: &str, readings: &[f64]) -> Self {
        self.lock()
            .scripts
            .insert(name.to_ascii_lowercase(), readings.iter().copied().collect());
        self
    }

    pub fn elapsed_now(&self) -> f64 {
        self.lock().elapsed
    }

    pub fn waits(&self) -> Vec<f64> {
        self.lock().waits.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptedState> {
        self.state.lock().expect("scripted store lock")
    }
}

impl ParameterStore for ScriptedStore {
    fn get_param(&self, name: &str) -> Result<Option<ParamValue>, MbeError> {
        let key = name.to_ascii_lowercase();
        let mut state = self.lock();
        if let Some(script) = state.scripts.get_mut(&key) {
            let value = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            };
            return Ok(value.map(ParamValue::Float));
        }
        Ok(state.values.get(&key).copied().map(ParamValue::Float))
    }

    fn set_param(&self, name: &str, value: &str) -> Result<bool, MbeError> {
        let Ok(value) = value.parse::<f64>() else {
            return Ok(false);
        };
        self.lock().values.insert(name.to_ascii_lowercase(), value);
        Ok(true)
    }

    fn press(&self, _button: Button) -> Result<bool, MbeError> {
        Ok(false)
    }

    fn set_shutter(&self, _shutter: &str, _state: ShutterState) -> Result<bool, MbeError> {
        Ok(false)
    }

    fn wait(&self, seconds: f64) -> Result<(), MbeError> {
        let mut state = self.lock();
        state.elapsed += seconds;
        state.waits.push(seconds);
        Ok(())
    }

    fn elapsed(&self) -> Result<f64, MbeError> {
        Ok(self.lock().elapsed)
    }

    fn try_start_recipe(&self) -> Result<bool, MbeError> {
        Ok(false)
    }
}
