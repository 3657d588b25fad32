//! Safe idle configuration of the chamber and the check that it holds.

#![allow(missing_docs)]

/// Shutters closed when entering standby.
pub const STANDBY_SHUTTERS: &[&str] = &[
    "In",
    "Ga",
    "As",
    "Al",
    "Sb",
    "SUSI",
    "SUKO",
    "Viewport",
    "Pyrometer",
];

/// Shutters that must read closed for the chamber to count as idle.
pub const CHECKED_SHUTTERS: &[&str] = &["In", "Ga", "As", "Al", "Sb", "SUSI", "SUKO"];

/// Outputs driven to zero in standby. `required = false` only logs failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroOutput {
    pub param: &'static str,
    pub required: bool,
}

pub const ZERO_OUTPUTS: &[ZeroOutput] = &[
    ZeroOutput {
        param: "AsCracker.Valve.OP",
        required: true,
    },
    ZeroOutput {
        param: "SbCracker.Valve.OP",
        required: false,
    },
    ZeroOutput {
        param: "Manip.RS.RPM",
        required: true,
    },
];

/// A PID cell ramped down to an idle setpoint. Cells already at or below it
/// are left alone so cooled cells are not heated back up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidStandby {
    pub device: &'static str,
    pub tsp: f64,
    pub rate: f64,
}

pub const PID_STANDBY: &[PidStandby] = &[
    PidStandby {
        device: "Manip",
        tsp: 200.0,
        rate: 100.0,
    },
    PidStandby {
        device: "In",
        tsp: 515.0,
        rate: 15.0,
    },
    PidStandby {
        device: "Ga",
        tsp: 550.0,
        rate: 40.0,
    },
    PidStandby {
        device: "Al",
        tsp: 750.0,
        rate: 10.0,
    },
    PidStandby {
        device: "Sb",
        tsp: 400.0,
        rate: 5.0,
    },
];

/// A manually driven doping cell brought to an idle output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualStandby {
    pub device: &'static str,
    pub op_tsp: f64,
    pub op_rate: f64,
}

pub const MANUAL_STANDBY: &[ManualStandby] = &[
    ManualStandby {
        device: "SUKO",
        op_tsp: 10.0,
        op_rate: 2.0,
    },
    ManualStandby {
        device: "SUSI",
        op_tsp: 10.0,
        op_rate: 2.0,
    },
];

/// Open interval a reading must fall inside when idle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeCheck {
    pub param: &'static str,
    pub min: f64,
    pub max: f64,
}

impl RangeCheck {
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.min < value && value < self.max
    }
}

pub const STANDBY_CHECKS: &[RangeCheck] = &[
    RangeCheck {
        param: "Manip.PV",
        min: 195.0,
        max: 205.0,
    },
    RangeCheck {
        param: "In.PV",
        min: 510.0,
        max: 520.0,
    },
    RangeCheck {
        param: "Ga.PV",
        min: 545.0,
        max: 555.0,
    },
    RangeCheck {
        param: "As.PV",
        min: 360.0,
        max: 410.0,
    },
    RangeCheck {
        param: "AsCracker.PV",
        min: 595.0,
        max: 1005.0,
    },
    RangeCheck {
        param: "SUKO.OP",
        min: 0.0,
        max: 40.0,
    },
    RangeCheck {
        param: "SUSI.OP",
        min: 0.0,
        max: 11.0,
    },
];
