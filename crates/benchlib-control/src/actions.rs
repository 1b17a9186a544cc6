//! Hardware action kinds and the per-channel load programming sequences.
//!
//! A load channel is programmed from the parameter tables in a fixed order:
//! select the mainframe slot, set the turn-on voltage, set each slope with
//! its range mode, then program the current. Unparseable cells skip only
//! their own setting.

use std::fmt;

use benchlib_core::capability::DcLoad;
use benchlib_core::config::{DataRow, DynamicMeta, InputRow, LoadMeta, cell_f64};
use benchlib_core::error::Result;
use benchlib_core::types::{DynamicCurrentParam, LoadMode, StaticCurrentParam};

/// Dwell time used when a dynamic row has no T1/T2 entry, in seconds.
pub const DEFAULT_DWELL: f64 = 0.01;

/// What to do with the AC input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAction {
    PowerOn,
    PowerOff,
    /// Apply a new setpoint without touching the output state.
    Change,
}

/// What to do with the static loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadAction {
    LoadOn,
    LoadOff,
    Change,
}

/// What to do with the dynamic loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DyLoadAction {
    DyLoadOn,
    DyLoadOff,
    Change,
}

impl fmt::Display for InputAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputAction::PowerOn => "PowerOn",
            InputAction::PowerOff => "PowerOff",
            InputAction::Change => "Change",
        })
    }
}

impl fmt::Display for LoadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadAction::LoadOn => "LoadOn",
            LoadAction::LoadOff => "LoadOff",
            LoadAction::Change => "Change",
        })
    }
}

impl fmt::Display for DyLoadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DyLoadAction::DyLoadOn => "DyLoadOn",
            DyLoadAction::DyLoadOff => "DyLoadOff",
            DyLoadAction::Change => "Change",
        })
    }
}

/// The electrical parameter tables the actions read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchParameters {
    pub load_meta: LoadMeta,
    pub load_rows: Vec<DataRow>,
    pub dynamic_meta: DynamicMeta,
    pub dynamic_rows: Vec<DataRow>,
    pub input_rows: Vec<InputRow>,
}

impl BenchParameters {
    pub fn load_row(&self, label: &str) -> Option<(usize, &DataRow)> {
        find_row(&self.load_rows, label)
    }

    pub fn dynamic_row(&self, label: &str) -> Option<(usize, &DataRow)> {
        find_row(&self.dynamic_rows, label)
    }
}

fn find_row<'a>(rows: &'a [DataRow], label: &str) -> Option<(usize, &'a DataRow)> {
    rows.iter().enumerate().find(|(_, r)| r.label == label)
}

/// The operator's current row selections.
///
/// `input` is a `"V/F/P"` setpoint; `load` and `dynamic` are row labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selections {
    pub input: String,
    pub load: String,
    pub dynamic: String,
}

/// One of the four slope setters on [`DcLoad`].
#[derive(Debug, Clone, Copy)]
enum Slope {
    StaticRise,
    StaticFall,
    DynamicRise,
    DynamicFall,
}

/// Select `range`, then set the slope. Skipped when the cell is empty.
async fn apply_slope(
    load: &dyn DcLoad,
    range: LoadMode,
    slope: Slope,
    value: Option<f64>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    load.set_load_mode(range).await?;
    match slope {
        Slope::StaticRise => load.set_static_rise_slope(value).await,
        Slope::StaticFall => load.set_static_fall_slope(value).await,
        Slope::DynamicRise => load.set_dynamic_rise_slope(value).await,
        Slope::DynamicFall => load.set_dynamic_fall_slope(value).await,
    }
}

/// Program one static load channel from `row`.
///
/// `LoadOff` only switches the channel off. Otherwise the value in the
/// channel's column is required; without it nothing is sent. Constant
/// voltage and constant resistance rows are not programmed as currents.
pub async fn apply_static_load(
    load: &dyn DcLoad,
    action: LoadAction,
    row: &DataRow,
    meta: &LoadMeta,
) -> Result<()> {
    let index = load.channel_index();
    if action == LoadAction::LoadOff {
        load.set_channel(load.real_channel()).await?;
        return load.set_load_off().await;
    }

    let Some(value) = cell_f64(&row.values, index) else {
        tracing::debug!(index, row = %row.label, "No static load value for channel");
        return Ok(());
    };
    let mode = column_text(&meta.modes, index)
        .map(|m| m.trim().to_uppercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "CC".to_string());

    load.set_channel(load.real_channel()).await?;
    if let Some(von) = cell_f64(&meta.von, index) {
        load.set_von(von).await?;
    }
    let slopes = [
        (LoadMode::CCH, &meta.rise_slope_cch, Slope::StaticRise),
        (LoadMode::CCH, &meta.fall_slope_cch, Slope::StaticFall),
        (LoadMode::CCL, &meta.rise_slope_ccl, Slope::StaticRise),
        (LoadMode::CCL, &meta.fall_slope_ccl, Slope::StaticFall),
    ];
    for (range, cells, slope) in slopes {
        apply_slope(load, range, slope, cell_f64(cells, index)).await?;
    }

    if mode == "CV" || mode == "CR" {
        tracing::warn!(mode = %mode, index, "Load mode is not constant current, value not programmed");
    } else {
        let vo = cell_f64(&meta.vo, index).unwrap_or(0.0);
        let param = StaticCurrentParam::uniform(value, load.num_segments(), vo);
        load.set_static_current(&param).await?;
    }

    if action == LoadAction::LoadOn {
        load.set_load_on().await?;
    }
    Ok(())
}

/// Program one dynamic load channel from `row`, which is row `row_index` of
/// the dynamic table.
///
/// Levels are written `"low~high"`; a single value is used for both. T1/T2
/// come from the `t1t2` entry aligned with the row, in the same form.
pub async fn apply_dynamic_load(
    load: &dyn DcLoad,
    action: DyLoadAction,
    row: &DataRow,
    row_index: usize,
    meta: &DynamicMeta,
) -> Result<()> {
    let index = load.channel_index();
    if action == DyLoadAction::DyLoadOff {
        load.set_channel(load.real_channel()).await?;
        return load.set_load_off().await;
    }

    let Some(cell) = column_text(&row.values, index).filter(|c| !c.trim().is_empty()) else {
        tracing::debug!(index, row = %row.label, "No dynamic load value for channel");
        return Ok(());
    };

    load.set_channel(load.real_channel()).await?;
    if let Some(von) = cell_f64(&meta.von, index) {
        load.set_von(von).await?;
    }
    let slopes = [
        (LoadMode::CCDH, &meta.rise_slope_ccdh, Slope::DynamicRise),
        (LoadMode::CCDH, &meta.fall_slope_ccdh, Slope::DynamicFall),
        (LoadMode::CCDL, &meta.rise_slope_ccdl, Slope::DynamicRise),
        (LoadMode::CCDL, &meta.fall_slope_ccdl, Slope::DynamicFall),
    ];
    for (range, cells, slope) in slopes {
        apply_slope(load, range, slope, cell_f64(cells, index)).await?;
    }

    let mut levels = parse_pair(cell);
    levels.truncate(load.num_segments());
    if levels.is_empty() {
        tracing::warn!(cell = %cell, index, "Dynamic levels not understood");
    } else {
        let timings = meta
            .t1t2
            .get(row_index)
            .map(|t| parse_pair(t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_DWELL, DEFAULT_DWELL]);
        let param = DynamicCurrentParam {
            enabled_mask: vec![true; levels.len()],
            levels,
            timings,
            expected_voltage: cell_f64(&meta.vo, index).unwrap_or(0.0),
        };
        load.set_dynamic_current(&param).await?;
    }

    if action == DyLoadAction::DyLoadOn {
        load.set_load_on().await?;
    }
    Ok(())
}

fn column_text(cells: &[String], index: i32) -> Option<&str> {
    let i = usize::try_from(index).ok()?.checked_sub(1)?;
    cells.get(i).map(String::as_str)
}

/// Parse `"a~b"` into two numbers, or `"a"` into `[a, a]`.
///
/// Returns an empty list when any part is not a number.
pub fn parse_pair(text: &str) -> Vec<f64> {
    let parts: Option<Vec<f64>> = text
        .split('~')
        .map(|p| p.trim().parse::<f64>().ok())
        .collect();
    match parts.as_deref() {
        Some([single]) => vec![*single, *single],
        Some(values) if !values.is_empty() => values.to_vec(),
        _ => Vec::new(),
    }
}
