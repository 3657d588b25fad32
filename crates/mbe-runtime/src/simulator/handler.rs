//! Command dispatch for the virtual controller.
//!
//! Commands are whitespace-delimited and case-insensitive:
//! `Get <p>`, `Set <p> <v>`, `Set <button>`, `Open <s>`, `Close <s>`,
//! `Wait <s>`, `OK` (keep-alive), `#reset_virt_mbe`, `#plot_log [file]`.

use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::codec::{REPLY_OK, REPLY_WAIT};
use crate::param::{Button, ShutterState};

use super::VirtualMbe;

const CONFIG: &str = "this.config";
const CHAMBER: &str = "this.chamber";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command applied, nothing to return.
    Ok,
    /// Requested value.
    Value(String),
    /// Rejected command with a human-readable reason.
    Error(SmolStr),
}

impl Response {
    fn error(message: impl Into<SmolStr>) -> Self {
        Self::Error(message.into())
    }

    /// Wire frames for this response. Values are announced with `WAIT` so
    /// that value text can never be confused with an error reply.
    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        match self {
            Self::Ok => vec![REPLY_OK.to_string()],
            Self::Value(value) => vec![REPLY_WAIT.to_string(), value.clone()],
            Self::Error(message) => vec![format!("Error! {message}")],
        }
    }
}

/// Apply one command to the simulator.
pub fn handle_command(mbe: &mut VirtualMbe, command: &str) -> Response {
    let command = command.trim();
    let words: Vec<&str> = command.split_whitespace().collect();
    let Some(verb) = words.first() else {
        return Response::error("empty command");
    };
    let verb = verb.to_ascii_lowercase();
    let response = match (verb.as_str(), &words[1..]) {
        ("ok", []) => Response::Ok,
        ("#reset_virt_mbe", []) => {
            mbe.reset();
            Response::Ok
        }
        ("#plot_log", args) if args.len() <= 1 => match mbe.export_log(args.first().copied()) {
            Ok(_) => Response::Ok,
            Err(err) => Response::error(err.to_string()),
        },
        ("get", [name]) => get(mbe, name),
        ("set", [name]) if Button::parse(name).is_some() => set(mbe, name, None),
        ("set", [name, value]) => set(mbe, name, Some(*value)),
        ("open", [name]) => shutter(mbe, name, ShutterState::Open),
        ("close", [name]) => shutter(mbe, name, ShutterState::Closed),
        ("wait", [seconds]) => {
            let accepted = seconds.parse::<f64>().is_ok_and(|value| mbe.wait(value));
            if accepted {
                Response::Ok
            } else {
                Response::error(format!("invalid wait duration '{seconds}'"))
            }
        }
        ("get" | "set" | "open" | "close" | "wait" | "#plot_log" | "#reset_virt_mbe", _) => {
            Response::error(format!("wrong number of arguments in '{command}'"))
        }
        _ => Response::error(format!("unknown command '{command}'")),
    };
    match &response {
        Response::Error(message) => warn!(command, %message, "command rejected"),
        _ => debug!(command, "command handled"),
    }
    response
}

fn get(mbe: &VirtualMbe, name: &str) -> Response {
    match name.to_ascii_lowercase().as_str() {
        CONFIG => Response::Value(mbe.description()),
        CHAMBER => Response::Value(mbe.chamber().to_string()),
        _ => match mbe.get_param(name) {
            Some(value) => Response::Value(value.to_string()),
            None => Response::error(format!("unknown parameter '{name}'")),
        },
    }
}

fn set(mbe: &mut VirtualMbe, name: &str, value: Option<&str>) -> Response {
    if mbe.set_param(name, value) {
        return Response::Ok;
    }
    if mbe.get_param(name).is_none() {
        Response::error(format!("unknown parameter '{name}'"))
    } else {
        Response::error(format!("cannot set '{name}' to '{}'", value.unwrap_or_default()))
    }
}

fn shutter(mbe: &mut VirtualMbe, name: &str, state: ShutterState) -> Response {
    set(mbe, &format!("shutter.{name}"), Some(state.as_str()))
}
