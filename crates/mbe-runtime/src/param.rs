//! Parameter names, typed slots and reply values.
//!
//! Names are dotted paths (`<Device>.<Attribute>[.<Sub>]`), case-insensitive,
//! with lower-case as the canonical form. Every slot has exactly one kind and
//! validates what is written to it; a failed write leaves the slot untouched.

#![allow(missing_docs)]

use std::fmt;

use smol_str::SmolStr;

/// Shared recipe counter.
pub const RECIPES_RUNNING: &str = "this.recipesrunning";
/// Simulated seconds since reset.
pub const TIME: &str = "time";
pub const PYROMETER_T: &str = "pyrometer.t";
pub const BFM_POSITION: &str = "bfm.lt";
pub const BFM_INSERTED: f64 = 124.0;
pub const BFM_RETRACTED: f64 = 0.0;

const ALIASES: &[(&str, &str)] = &[
    ("manip.rs", "manip.rs.rpm"),
    ("ascracker.valve", "ascracker.valve.op"),
    ("sbcracker.valve", "sbcracker.valve.op"),
];

/// Lower-case a name and resolve short aliases to their full path.
#[must_use]
pub fn canonical_name(name: &str) -> SmolStr {
    let lower = name.trim().to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map_or_else(|| SmolStr::new(&lower), |(_, full)| SmolStr::new(full))
}

/// Value-less parameters that move the beam flux monitor to an end stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    BfmIn,
    BfmOut,
}

impl Button {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match canonical_name(name).as_str() {
            "bfm.lt.in" => Some(Self::BfmIn),
            "bfm.lt.out" => Some(Self::BfmOut),
            _ => None,
        }
    }

    #[must_use]
    pub fn target(self) -> (&'static str, f64) {
        match self {
            Self::BfmIn => (BFM_POSITION, BFM_INSERTED),
            Self::BfmOut => (BFM_POSITION, BFM_RETRACTED),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Closed-loop: PV follows PV.TSP.
    #[default]
    Auto,
    /// Open-loop: OP follows OP.TSP.
    Manual,
}

impl ControlMode {
    /// `pid` is the controller's own spelling of automatic mode.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "auto" | "pid" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutterState {
    Open,
    #[default]
    Closed,
}

impl ShutterState {
    /// Booleans are accepted as surrogates (`true` = open).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "open" | "true" => Some(Self::Open),
            "closed" | "false" => Some(Self::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_open(open: bool) -> Self {
        if open {
            Self::Open
        } else {
            Self::Closed
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Command word that drives a shutter into this state.
    #[must_use]
    pub fn command_word(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Closed => "Close",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Shutter,
    Mode,
    Counter,
}

impl ParamKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Shutter => "shutter",
            Self::Mode => "mode",
            Self::Counter => "counter",
        }
    }
}

/// One typed parameter slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    Float(f64),
    Shutter(ShutterState),
    Mode(ControlMode),
    Counter(u32),
}

impl Param {
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Float(_) => ParamKind::Float,
            Self::Shutter(_) => ParamKind::Shutter,
            Self::Mode(_) => ParamKind::Mode,
            Self::Counter(_) => ParamKind::Counter,
        }
    }

    #[must_use]
    pub fn value(&self) -> ParamValue {
        match *self {
            Self::Float(value) => ParamValue::Float(value),
            Self::Shutter(state) => ParamValue::Text(state.as_str().into()),
            Self::Mode(mode) => ParamValue::Text(mode.as_str().into()),
            Self::Counter(count) => ParamValue::Float(f64::from(count)),
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(value) => Some(value),
            Self::Counter(count) => Some(f64::from(count)),
            Self::Shutter(_) | Self::Mode(_) => None,
        }
    }

    /// Apply raw command text. Returns `false`, leaving the slot unchanged,
    /// when the text is not valid for this kind.
    pub fn apply(&mut self, raw: &str) -> bool {
        match self {
            Self::Float(value) => match parse_finite(raw) {
                Some(parsed) => {
                    *value = parsed;
                    true
                }
                None => false,
            },
            Self::Shutter(state) => match ShutterState::parse(raw) {
                Some(parsed) => {
                    *state = parsed;
                    true
                }
                None => false,
            },
            Self::Mode(mode) => match ControlMode::parse(raw) {
                Some(parsed) => {
                    *mode = parsed;
                    true
                }
                None => false,
            },
            Self::Counter(count) => apply_counter(count, raw),
        }
    }
}

fn apply_counter(count: &mut u32, raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "inc" => {
            *count = count.saturating_add(1);
            true
        }
        "dec" => {
            *count = count.saturating_sub(1);
            true
        }
        // Compare-and-increment: only succeeds from zero.
        "claim" => {
            if *count == 0 {
                *count = 1;
                true
            } else {
                false
            }
        }
        other => match other.parse::<u32>() {
            Ok(parsed) => {
                *count = parsed;
                true
            }
            Err(_) => false,
        },
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// A value as read back from a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Bool(bool),
    Text(SmolStr),
}

impl ParamValue {
    /// Interpret reply text: numbers, then booleans, then plain text.
    #[must_use]
    pub fn parse_reply(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(value) = parse_finite(trimmed) {
            return Self::Float(value);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => Self::Text(SmolStr::new(trimmed)),
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Readback comparison: numbers within `tolerance`, everything else by
    /// normalised text so that `true` matches `open` and `pid` matches `auto`.
    #[must_use]
    pub fn matches(&self, expected: &ParamValue, tolerance: f64) -> bool {
        match (self, expected) {
            (Self::Float(actual), Self::Float(expected)) => (actual - expected).abs() <= tolerance,
            (Self::Float(_), _) | (_, Self::Float(_)) => false,
            _ => self.normalized() == expected.normalized(),
        }
    }

    fn normalized(&self) -> SmolStr {
        let text = self.to_string().to_ascii_lowercase();
        if let Some(state) = ShutterState::parse(&text) {
            return state.as_str().into();
        }
        if let Some(mode) = ControlMode::parse(&text) {
            return mode.as_str().into();
        }
        text.into()
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(SmolStr::new(value))
    }
}

impl From<ControlMode> for ParamValue {
    fn from(value: ControlMode) -> Self {
        Self::Text(value.as_str().into())
    }
}
