//! Chroma 6310-series load module ratings and automatic range selection.
//!
//! Each plug-in module has a low and a high current range. A range is usable
//! for a program when the requested current and power stay within 95% of its
//! ratings and the expected voltage lies inside its voltage window.
//!
//! | Module | Low range    | High range     | Voltage      |
//! |--------|--------------|----------------|--------------|
//! | 63101  | 20 W / 4 A   | 200 W / 40 A   | 1-80 V       |
//! | 63102  | 20 W / 2 A   | 100 W / 20 A   | 1-80 V       |
//! | 63103  | 30 W / 6 A   | 300 W / 60 A   | 1-80 / 2.5-500 V |
//! | 63105  | 30 W / 1 A   | 300 W / 10 A   | 2.5-500 V    |
//! | 63106  | 60 W / 12 A  | 600 W / 120 A  | 1-80 V       |
//! | 63108  | 60 W / 2 A   | 600 W / 20 A   | 2.5-500 V    |
//! | 63112  | 120 W / 24 A | 1200 W / 240 A | 1-80 V       |

use benchlib_core::types::LoadMode;

/// Fraction of a rating a program may use.
pub const DERATING: f64 = 0.95;

/// Ratings of one current range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSpec {
    pub max_power: f64,
    pub max_current: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
}

impl RangeSpec {
    const fn new(max_power: f64, max_current: f64, min_voltage: f64, max_voltage: f64) -> Self {
        Self {
            max_power,
            max_current,
            min_voltage,
            max_voltage,
        }
    }

    /// Whether `current` at `voltage` fits this range after derating.
    pub fn fits(&self, current: f64, voltage: f64) -> bool {
        current <= self.max_current * DERATING
            && current * voltage <= self.max_power * DERATING
            && voltage >= self.min_voltage
            && voltage <= self.max_voltage
    }
}

/// Ratings of one load module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSpec {
    pub sub_model: &'static str,
    pub low: RangeSpec,
    pub high: RangeSpec,
}

const SPECS: &[LoadSpec] = &[
    LoadSpec {
        sub_model: "63101",
        low: RangeSpec::new(20.0, 4.0, 1.0, 80.0),
        high: RangeSpec::new(200.0, 40.0, 1.0, 80.0),
    },
    LoadSpec {
        sub_model: "63102",
        low: RangeSpec::new(20.0, 2.0, 1.0, 80.0),
        high: RangeSpec::new(100.0, 20.0, 1.0, 80.0),
    },
    LoadSpec {
        sub_model: "63103",
        low: RangeSpec::new(30.0, 6.0, 1.0, 80.0),
        high: RangeSpec::new(300.0, 60.0, 2.5, 500.0),
    },
    LoadSpec {
        sub_model: "63105",
        low: RangeSpec::new(30.0, 1.0, 2.5, 500.0),
        high: RangeSpec::new(300.0, 10.0, 2.5, 500.0),
    },
    LoadSpec {
        sub_model: "63106",
        low: RangeSpec::new(60.0, 12.0, 1.0, 80.0),
        high: RangeSpec::new(600.0, 120.0, 1.0, 80.0),
    },
    LoadSpec {
        sub_model: "63108",
        low: RangeSpec::new(60.0, 2.0, 2.5, 500.0),
        high: RangeSpec::new(600.0, 20.0, 2.5, 500.0),
    },
    LoadSpec {
        sub_model: "63112",
        low: RangeSpec::new(120.0, 24.0, 1.0, 80.0),
        high: RangeSpec::new(1200.0, 240.0, 1.0, 80.0),
    },
];

/// Ratings for a module, e.g. `"63103"`.
pub fn spec_for(sub_model: &str) -> Option<&'static LoadSpec> {
    let sub_model = sub_model.trim();
    SPECS.iter().find(|s| s.sub_model == sub_model)
}

/// Every module this crate drives.
pub fn supported_sub_models() -> impl Iterator<Item = &'static str> {
    SPECS.iter().map(|s| s.sub_model)
}

/// Choose the constant-current range for `current` amps at `voltage` volts.
///
/// The low range wins when both fit. With no fitting range the high range is
/// used; an unknown module gets the low range.
pub fn select_load_mode(sub_model: &str, current: f64, voltage: f64) -> LoadMode {
    let Some(spec) = spec_for(sub_model) else {
        tracing::warn!(sub_model = %sub_model, "Unknown load model, using CCL");
        return LoadMode::CCL;
    };
    if spec.low.fits(current, voltage) {
        LoadMode::CCL
    } else if spec.high.fits(current, voltage) {
        LoadMode::CCH
    } else {
        tracing::warn!(
            sub_model = %sub_model,
            current,
            voltage,
            "No range fits the program, using CCH"
        );
        LoadMode::CCH
    }
}
