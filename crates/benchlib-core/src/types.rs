//! Common types used across all benchlib instrument backends.
//!
//! These are instrument-domain values: load modes, current programs, trigger
//! settings, and measurement snapshots. Each vendor crate translates them
//! into its own command strings.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ---------------------------------------------------------------------------
// DC load
// ---------------------------------------------------------------------------

/// Operating mode of an electronic DC load channel.
///
/// The `L`/`H` suffix selects the low or high current range; the `D`
/// variants are the dynamic (two-level switching) modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Constant current, low range.
    CCL,
    /// Constant current, high range.
    CCH,
    /// Dynamic constant current, low range.
    CCDL,
    /// Dynamic constant current, high range.
    CCDH,
    /// Constant resistance, low range.
    CRL,
    /// Constant resistance, high range.
    CRH,
    /// Constant voltage.
    CV,
}

impl LoadMode {
    /// The mnemonic used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::CCL => "CCL",
            LoadMode::CCH => "CCH",
            LoadMode::CCDL => "CCDL",
            LoadMode::CCDH => "CCDH",
            LoadMode::CRL => "CRL",
            LoadMode::CRH => "CRH",
            LoadMode::CV => "CV",
        }
    }

    /// The dynamic counterpart of a static constant-current range.
    ///
    /// `CCH` maps to `CCDH`; every other mode maps to `CCDL`.
    pub fn to_dynamic(self) -> LoadMode {
        match self {
            LoadMode::CCH | LoadMode::CCDH => LoadMode::CCDH,
            _ => LoadMode::CCDL,
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CCL" => Ok(LoadMode::CCL),
            "CCH" => Ok(LoadMode::CCH),
            "CCDL" => Ok(LoadMode::CCDL),
            "CCDH" => Ok(LoadMode::CCDH),
            "CRL" => Ok(LoadMode::CRL),
            "CRH" => Ok(LoadMode::CRH),
            "CV" => Ok(LoadMode::CV),
            other => Err(Error::InvalidParameter(format!("invalid load mode: {other}"))),
        }
    }
}

/// A static constant-current program.
///
/// `levels[i]` is applied to segment `i` when `enabled_mask[i]` is set (an
/// empty mask enables every segment). `expected_voltage` is the voltage the
/// device under test will present, used for automatic range selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticCurrentParam {
    pub levels: Vec<f64>,
    pub enabled_mask: Vec<bool>,
    pub expected_voltage: f64,
}

impl StaticCurrentParam {
    /// The same level on `segments` segments, all enabled.
    pub fn uniform(level: f64, segments: usize, expected_voltage: f64) -> Self {
        Self {
            levels: vec![level; segments],
            enabled_mask: vec![true; segments],
            expected_voltage,
        }
    }
}

/// A dynamic (two-level switching) current program.
///
/// `timings` holds the dwell times T1 and T2 in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicCurrentParam {
    pub levels: Vec<f64>,
    pub enabled_mask: Vec<bool>,
    pub timings: Vec<f64>,
    pub expected_voltage: f64,
}

/// Whether segment `i` of a program is enabled.
pub fn segment_enabled(mask: &[bool], i: usize) -> bool {
    mask.is_empty() || mask.get(i).copied().unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Oscilloscope
// ---------------------------------------------------------------------------

/// Trigger edge slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSlope {
    Rising,
    Falling,
    Either,
}

impl FromStr for TriggerSlope {
    type Err = Error;

    /// Accepts `RISING`/`RISE`/`POS`, `FALLING`/`FALL`/`NEG`, `BOTH`/`EITHER`,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RISING" | "RISE" | "POS" => Ok(TriggerSlope::Rising),
            "FALLING" | "FALL" | "NEG" => Ok(TriggerSlope::Falling),
            "BOTH" | "EITHER" => Ok(TriggerSlope::Either),
            other => Err(Error::InvalidParameter(format!(
                "invalid trigger slope: {other} (valid options: RISING, FALLING, BOTH)"
            ))),
        }
    }
}

/// Input coupling of an oscilloscope channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
    DcReject,
    Gnd,
}

impl Coupling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coupling::Ac => "AC",
            Coupling::Dc => "DC",
            Coupling::DcReject => "DCREJ",
            Coupling::Gnd => "GND",
        }
    }
}

impl FromStr for Coupling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AC" => Ok(Coupling::Ac),
            "DC" => Ok(Coupling::Dc),
            "DCREJ" | "DCREJECT" => Ok(Coupling::DcReject),
            "GND" => Ok(Coupling::Gnd),
            other => Err(Error::InvalidParameter(format!("invalid coupling: {other}"))),
        }
    }
}

/// File format for waveform export on the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformFormat {
    Internal,
    Csv,
    Text,
    Matlab,
}

impl WaveformFormat {
    /// The keyword the instrument expects for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveformFormat::Internal => "INTERNAL",
            WaveformFormat::Csv => "SPREADSHEETCSV",
            WaveformFormat::Text => "SPREADSHEETTXT",
            WaveformFormat::Matlab => "MATLAB",
        }
    }
}

/// Image format for screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Bmp,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Bmp => "BMP",
            ImageFormat::Jpeg => "JPEG",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// Portion of a stored waveform to export. `None` exports the full record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordRange {
    pub start: Option<u32>,
    pub stop: Option<u32>,
}

// ---------------------------------------------------------------------------
// AC source
// ---------------------------------------------------------------------------

/// One snapshot of AC output measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcMeasurement {
    /// RMS output voltage in volts.
    pub voltage: f64,
    /// RMS output current in amperes.
    pub current: f64,
    /// Real power in watts.
    pub real_power: f64,
    /// Reactive power in VAR.
    pub reactive_power: f64,
    /// Apparent power in VA.
    pub apparent_power: f64,
    /// Power factor (0..1).
    pub power_factor: f64,
    /// Output frequency in hertz.
    pub frequency: f64,
}

/// Output settings of an AC source in one call: `"V/F/P"` such as `"90/60/0"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcSetpoint {
    pub voltage: f64,
    pub frequency: f64,
    pub phase: f64,
}

impl FromStr for AcSetpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() < 3 {
            return Err(Error::InvalidParameter(
                "Input format error. voltage/frequency/phase (e.g. 90/60/0)".into(),
            ));
        }
        // Unparseable fields read as zero, matching how operators type
        // partial rows such as "90//0".
        let field = |i: usize| parts[i].trim().parse::<f64>().unwrap_or(0.0);
        Ok(AcSetpoint {
            voltage: field(0),
            frequency: field(1),
            phase: field(2),
        })
    }
}
