//! Debounced configuration apply and hardware action execution.
//!
//! The [`InstrumentOrchestrator`] owns the bench's oscilloscope set. A new
//! configuration snapshot is not applied straight away: each submission
//! restarts a debounce timer, and only the last snapshot of a burst is
//! applied once the timer fires.
//!
//! ```text
//!   Idle ──submit──► Pending ──timer──► Processing ──done──► Idle
//!                      ▲                    │
//!                      └──────submit────────┘   (re-run after the current one)
//! ```
//!
//! Only one apply runs at a time. A snapshot submitted while an apply is in
//! flight is queued and applied after it; the phase reads `Pending` until
//! then. If the apply task panics, the run is abandoned and reported as
//! [`OrchestratorEvent::Error`].
//!
//! Hardware actions (AC input power, static loads, dynamic loads) build
//! their instruments fresh from the stored configuration, run, and release
//! every link they opened. They are all-or-nothing: if any instrument fails
//! to connect, everything opened for that action is closed and dropped
//! before the failure is reported.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use benchlib_core::capability::{AcSource, DcLoad, Instrument, Oscilloscope};
use benchlib_core::config::{ConfigSnapshot, InstrumentRecord, InstrumentRole, Timings};
use benchlib_core::error::{Error, Result};
use benchlib_core::events::{LoadKind, MessageSink, OrchestratorEvent};
use benchlib_core::types::AcSetpoint;
use benchlib_scpi::{InstrumentLink, SharedLink};
use benchlib_transport::ChannelProvider;

use crate::actions::{
    BenchParameters, DyLoadAction, InputAction, LoadAction, Selections, apply_dynamic_load,
    apply_static_load,
};
use crate::registry::ModelRegistry;

const EVENT_CAPACITY: usize = 64;

/// Title used for every operator warning.
///
/// Unexpected background failures go to [`MessageSink::error`] under the
/// same title.
pub const ERROR_TITLE: &str = "Error Message";

const NO_SETTINGS: &str = "No instrument settings have been loaded.\nPlease load the configuration first!";
const NO_INPUT: &str = "No input conditions.\nPlease check the input conditions.\n (example : voltage / frequency / phase)";
const NO_LOAD_SELECTION: &str = "No load conditions selected.\nPlease select load conditions first!";
const NO_DYNAMIC_SELECTION: &str =
    "No dynamic load conditions selected.\nPlease select dynamic load conditions first!";
const NO_POWER: &str = "No power instruments found.";
const POWER_DISABLED: &str = "Power is not enabled.\nPlease check the Instruments configuration!";
const NOT_SPECIFIED: &str = "Instrument model or address not set.\nPlease check the Instruments configuration!";
const FORMAT_ERROR: &str = "Communication format error.\nPlease check the Instruments configuration!";
const SOURCE_FAILED: &str = "AC Source creation failed!";
const NO_LOADS: &str = "No valid DC Load channel is enabled or configured!";
const NO_DYNAMIC_LOADS: &str = "No valid DC Load channel is enabled or configured for dynamic load!";
const APPLY_ABORTED: &str = "Configuration apply stopped unexpectedly.";

/// Name of the configuration record that drives the AC input.
pub const SOURCE_RECORD: &str = "Source";

/// Where the configuration apply state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Idle,
    /// A snapshot is waiting for its debounce timer.
    Pending,
    Processing,
}

/// Debounce bookkeeping. Pure; the orchestrator drives it under one lock.
#[derive(Debug, Default)]
struct ApplyState {
    pending: Option<ConfigSnapshot>,
    generation: u64,
    running: bool,
    /// The latest timer fired while a run was in flight.
    due: bool,
}

impl ApplyState {
    fn phase(&self) -> ApplyPhase {
        if self.pending.is_some() {
            ApplyPhase::Pending
        } else if self.running {
            ApplyPhase::Processing
        } else {
            ApplyPhase::Idle
        }
    }

    /// Remember `config` as the latest snapshot; returns its timer's generation.
    fn schedule(&mut self, config: ConfigSnapshot) -> u64 {
        self.generation += 1;
        self.pending = Some(config);
        self.due = false;
        self.generation
    }

    /// Timer `generation` fired. Returns the snapshot to apply now, if any.
    fn begin(&mut self, generation: u64) -> Option<ConfigSnapshot> {
        if generation != self.generation {
            return None;
        }
        if self.running {
            self.due = true;
            return None;
        }
        let config = self.pending.take()?;
        self.running = true;
        Some(config)
    }

    /// A run finished. Returns a queued snapshot whose timer already fired.
    fn finish(&mut self) -> Option<ConfigSnapshot> {
        if self.due {
            self.due = false;
            if let Some(config) = self.pending.take() {
                return Some(config);
            }
        }
        self.running = false;
        None
    }

    /// The running apply died. A snapshot that was only waiting on that run
    /// is dropped with it; one whose timer is still pending keeps it.
    fn abort(&mut self) {
        self.running = false;
        if self.due {
            self.due = false;
            self.pending = None;
        }
    }
}

#[derive(Debug, Default)]
struct BenchState {
    config: Option<ConfigSnapshot>,
    params: BenchParameters,
    selections: Selections,
}

struct OpenScope {
    name: String,
    scope: Arc<dyn Oscilloscope>,
}

/// DC loads opened for one action, with the links they share.
struct LoadSet {
    links: Vec<SharedLink>,
    loads: Vec<Arc<dyn DcLoad>>,
}

impl LoadSet {
    async fn release(self) {
        let LoadSet { links, loads } = self;
        drop(loads);
        for link in links {
            let mut link = link.lock().await;
            if let Err(e) = link.disconnect().await {
                tracing::warn!(addr = %link.endpoint(), error = %e, "Load link close failed");
            }
        }
    }
}

struct Inner {
    provider: Arc<dyn ChannelProvider>,
    registry: ModelRegistry,
    sink: Arc<dyn MessageSink>,
    events: broadcast::Sender<OrchestratorEvent>,
    timings: Timings,
    apply: Mutex<ApplyState>,
    bench: Mutex<BenchState>,
    scopes: Mutex<Vec<OpenScope>>,
    shutdown: CancellationToken,
}

/// Owns the bench configuration and runs hardware actions against it.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InstrumentOrchestrator {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The text shown to the operator for `err`.
pub fn operator_message(err: &Error) -> String {
    match err {
        Error::Config(m) | Error::Connection(m) | Error::InvalidParameter(m) => m.clone(),
        other => other.to_string(),
    }
}

impl InstrumentOrchestrator {
    pub fn new(
        provider: Arc<dyn ChannelProvider>,
        sink: Arc<dyn MessageSink>,
        timings: Timings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                provider,
                registry: ModelRegistry::new(timings.clone()),
                sink,
                events,
                timings,
                apply: Mutex::new(ApplyState::default()),
                bench: Mutex::new(BenchState::default()),
                scopes: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    pub fn apply_phase(&self) -> ApplyPhase {
        lock(&self.inner.apply).phase()
    }

    /// The most recently submitted configuration.
    pub fn config(&self) -> Option<ConfigSnapshot> {
        lock(&self.inner.bench).config.clone()
    }

    /// Replace the electrical parameter tables.
    pub fn set_parameters(&self, params: BenchParameters) {
        lock(&self.inner.bench).params = params;
    }

    /// Record the operator's selection for `kind`.
    ///
    /// `Input` takes a `"V/F/P"` setpoint, `Load` and `DyLoad` a row label.
    pub fn select(&self, kind: LoadKind, text: &str) {
        let mut bench = lock(&self.inner.bench);
        match kind {
            LoadKind::Input => bench.selections.input = text.to_string(),
            LoadKind::Load => bench.selections.load = text.to_string(),
            LoadKind::DyLoad => bench.selections.dynamic = text.to_string(),
            LoadKind::Relay => tracing::debug!("Relay selections are not used"),
        }
    }

    /// A connected oscilloscope of `model` from the applied configuration.
    pub fn oscilloscope(&self, model: &str) -> Option<Arc<dyn Oscilloscope>> {
        lock(&self.inner.scopes)
            .iter()
            .find(|s| s.scope.model().eq_ignore_ascii_case(model.trim()))
            .map(|s| s.scope.clone())
    }

    /// Names of the oscilloscope records currently held.
    pub fn instrument_names(&self) -> Vec<String> {
        lock(&self.inner.scopes).iter().map(|s| s.name.clone()).collect()
    }

    /// Submit a new configuration. It is applied once no further snapshot
    /// has arrived for the debounce delay.
    pub fn submit_config(&self, config: ConfigSnapshot) {
        lock(&self.inner.bench).config = Some(config.clone());
        let generation = lock(&self.inner.apply).schedule(config);
        tracing::debug!(generation, "Configuration change scheduled");

        let inner = self.inner.clone();
        let run = tokio::spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(inner.timings.debounce()) => {}
            }
            let mut next = lock(&inner.apply).begin(generation);
            while let Some(config) = next {
                inner.apply(config).await;
                next = lock(&inner.apply).finish();
            }
        });

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = run.await {
                if e.is_panic() {
                    inner.apply_aborted();
                }
            }
        });
    }

    /// Drive the AC input source. Failures are reported to the sink and as
    /// [`OrchestratorEvent::ForceOff`] as well as returned.
    pub async fn execute_input(&self, action: InputAction) -> Result<()> {
        tracing::info!(action = %action, "Input action");
        let result = self.inner.run_input(action).await;
        self.inner.report(LoadKind::Input, result)
    }

    /// Program the static loads from the selected load row.
    pub async fn execute_load(&self, action: LoadAction) -> Result<()> {
        tracing::info!(action = %action, "Load action");
        let result = self.inner.run_load(action).await;
        self.inner.report(LoadKind::Load, result)
    }

    /// Program the dynamic loads from the selected dynamic row.
    pub async fn execute_dy_load(&self, action: DyLoadAction) -> Result<()> {
        tracing::info!(action = %action, "Dynamic load action");
        let result = self.inner.run_dy_load(action).await;
        self.inner.report(LoadKind::DyLoad, result)
    }

    /// [`execute_input`](Self::execute_input) on a background task.
    pub fn spawn_input(&self, action: InputAction) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute_input(action).await })
    }

    pub fn spawn_load(&self, action: LoadAction) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute_load(action).await })
    }

    pub fn spawn_dy_load(&self, action: DyLoadAction) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute_dy_load(action).await })
    }

    /// Cancel pending debounce timers and close every held oscilloscope.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let scopes = std::mem::take(&mut *lock(&self.inner.scopes));
        release_scopes(&scopes).await;
        tracing::info!(count = scopes.len(), "Orchestrator shut down");
    }
}

async fn release_scopes(scopes: &[OpenScope]) {
    for open in scopes {
        if let Err(e) = open.scope.disconnect().await {
            tracing::warn!(name = %open.name, error = %e, "Oscilloscope close failed");
        }
    }
}

impl Inner {
    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    fn apply_aborted(&self) {
        lock(&self.apply).abort();
        tracing::error!("Configuration apply task panicked");
        self.sink.error(ERROR_TITLE, APPLY_ABORTED);
        self.emit(OrchestratorEvent::Error {
            message: APPLY_ABORTED.into(),
        });
    }

    fn report(&self, kind: LoadKind, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => {
                tracing::info!(kind = %kind, "Action completed");
                self.emit(OrchestratorEvent::ActionCompleted { kind });
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Action failed");
                self.sink.warning(ERROR_TITLE, &operator_message(e));
                self.emit(OrchestratorEvent::ForceOff { kind });
            }
        }
        result
    }

    /// A closed link to `address`, or `None` if the address is not understood.
    fn link_for(&self, address: &str) -> Option<SharedLink> {
        let channel = self.provider.create(address.trim())?;
        Some(
            InstrumentLink::new(channel)
                .with_timeout(self.timings.transport_timeout())
                .shared(),
        )
    }

    async fn apply(&self, config: ConfigSnapshot) {
        self.emit(OrchestratorEvent::ApplyStarted);
        tracing::info!(records = config.instruments.len(), "Applying configuration");

        let mut opened = Vec::new();
        for record in config.active(InstrumentRole::Oscilloscope) {
            match self.open_scope(record).await {
                Ok(scope) => opened.push(scope),
                Err(e) => {
                    release_scopes(&opened).await;
                    drop(opened);
                    tracing::warn!(name = %record.name, error = %e, "Configuration apply failed, keeping previous instruments");
                    self.sink.warning(ERROR_TITLE, &operator_message(&e));
                    let held = lock(&self.scopes).len();
                    self.emit(OrchestratorEvent::ApplyFinished {
                        success: false,
                        instruments: held,
                    });
                    return;
                }
            }
        }

        let count = opened.len();
        let previous = std::mem::replace(&mut *lock(&self.scopes), opened);
        release_scopes(&previous).await;
        tracing::info!(instruments = count, "Configuration applied");
        self.emit(OrchestratorEvent::ApplyFinished {
            success: true,
            instruments: count,
        });
    }

    async fn open_scope(&self, record: &InstrumentRecord) -> Result<OpenScope> {
        let link = self
            .link_for(&record.address)
            .ok_or_else(|| Error::Config(FORMAT_ERROR.into()))?;
        let scope = self
            .registry
            .oscilloscope(&record.model_name, link)
            .ok_or_else(|| {
                Error::Config(format!("Unsupported oscilloscope model: {}", record.model_name))
            })?;
        if let Err(e) = scope.connect().await {
            tracing::debug!(name = %record.name, error = %e, "Oscilloscope connect failed");
            return Err(Error::Connection(format!(
                "{} communication open failed!",
                scope.model()
            )));
        }
        Ok(OpenScope {
            name: record.name.clone(),
            scope,
        })
    }

    async fn run_input(&self, action: InputAction) -> Result<()> {
        let (config, text) = {
            let bench = lock(&self.bench);
            (bench.config.clone(), bench.selections.input.clone())
        };
        let config = config
            .filter(|c| !c.instruments.is_empty())
            .ok_or_else(|| Error::Config(NO_SETTINGS.into()))?;
        if text.trim().is_empty() {
            return Err(Error::InvalidParameter(NO_INPUT.into()));
        }
        let setpoint: AcSetpoint = text.trim().parse()?;

        let record = config
            .instruments
            .iter()
            .find(|r| r.name == SOURCE_RECORD && r.role == InstrumentRole::InputSource)
            .ok_or_else(|| Error::Config(NO_POWER.into()))?;
        if !record.enabled {
            return Err(Error::Config(POWER_DISABLED.into()));
        }
        if !record.is_fully_specified() {
            return Err(Error::Config(NOT_SPECIFIED.into()));
        }
        let link = self
            .link_for(&record.address)
            .ok_or_else(|| Error::Config(FORMAT_ERROR.into()))?;
        let source = self
            .registry
            .ac_source(&record.model_name, link)
            .ok_or_else(|| Error::Config(SOURCE_FAILED.into()))?;
        if let Err(e) = source.connect().await {
            tracing::debug!(error = %e, "AC source connect failed");
            return Err(Error::Connection(format!(
                "{} communication open failed!",
                source.model()
            )));
        }

        let result = drive_source(&*source, action, setpoint).await;
        if let Err(e) = source.disconnect().await {
            tracing::warn!(error = %e, "AC source close failed");
        }
        result
    }

    async fn run_load(&self, action: LoadAction) -> Result<()> {
        let (config, row, meta) = {
            let bench = lock(&self.bench);
            let config = bench
                .config
                .clone()
                .filter(|c| !c.instruments.is_empty())
                .ok_or_else(|| Error::Config(NO_SETTINGS.into()))?;
            if bench.selections.load.trim().is_empty() {
                return Err(Error::InvalidParameter(NO_LOAD_SELECTION.into()));
            }
            let row = bench
                .params
                .load_row(&bench.selections.load)
                .map(|(_, row)| row.clone())
                .unwrap_or_default();
            (config, row, bench.params.load_meta.clone())
        };

        let set = self.open_loads(&config, LoadKind::Load).await?;
        let mut result = Ok(());
        for load in &set.loads {
            result = apply_static_load(&**load, action, &row, &meta).await;
            if result.is_err() {
                break;
            }
        }
        set.release().await;
        result
    }

    async fn run_dy_load(&self, action: DyLoadAction) -> Result<()> {
        let (config, row, row_index, meta) = {
            let bench = lock(&self.bench);
            let config = bench
                .config
                .clone()
                .filter(|c| !c.instruments.is_empty())
                .ok_or_else(|| Error::Config(NO_SETTINGS.into()))?;
            if bench.selections.dynamic.trim().is_empty() {
                return Err(Error::InvalidParameter(NO_DYNAMIC_SELECTION.into()));
            }
            let (row_index, row) = bench
                .params
                .dynamic_row(&bench.selections.dynamic)
                .map(|(i, row)| (i, row.clone()))
                .unwrap_or_default();
            (config, row, row_index, bench.params.dynamic_meta.clone())
        };

        let set = self.open_loads(&config, LoadKind::DyLoad).await?;
        let mut result = Ok(());
        for load in &set.loads {
            result = apply_dynamic_load(&**load, action, &row, row_index, &meta).await;
            if result.is_err() {
                break;
            }
        }
        set.release().await;
        result
    }

    /// Build and connect one DC load per bound channel of every active load
    /// record. Records at the same address share one link.
    async fn open_loads(&self, config: &ConfigSnapshot, kind: LoadKind) -> Result<LoadSet> {
        let mut links: Vec<(String, SharedLink)> = Vec::new();
        let mut loads: Vec<Arc<dyn DcLoad>> = Vec::new();

        for record in config.active(InstrumentRole::Load) {
            let address = record.address.trim();
            let link = match links.iter().find(|(a, _)| a == address) {
                Some((_, link)) => link.clone(),
                None => {
                    let Some(link) = self.link_for(address) else {
                        rollback(links, loads).await;
                        return Err(Error::Config(FORMAT_ERROR.into()));
                    };
                    links.push((address.to_string(), link.clone()));
                    link
                }
            };

            for (i, binding) in record.channels.iter().enumerate() {
                if binding.sub_model.trim().is_empty() || binding.ui_index <= 0 {
                    continue;
                }
                let Some(load) = self.registry.dc_load(
                    &binding.sub_model,
                    link.clone(),
                    record.hardware_channel(i),
                    binding.ui_index,
                ) else {
                    tracing::warn!(sub_model = %binding.sub_model, name = %record.name, "Unknown load module, channel skipped");
                    continue;
                };
                if let Err(e) = load.connect().await {
                    tracing::warn!(name = %record.name, addr = %address, error = %e, "Load connect failed, rolling back");
                    let message = format!("{} communication open failed!", load.model());
                    drop(load);
                    rollback(links, loads).await;
                    return Err(Error::Connection(message));
                }
                loads.push(load);
            }
        }

        if loads.is_empty() {
            rollback(links, loads).await;
            let message = if kind == LoadKind::DyLoad {
                NO_DYNAMIC_LOADS
            } else {
                NO_LOADS
            };
            return Err(Error::Config(message.into()));
        }
        tracing::debug!(loads = loads.len(), links = links.len(), "Load channels opened");
        Ok(LoadSet {
            links: links.into_iter().map(|(_, link)| link).collect(),
            loads,
        })
    }
}

async fn rollback(links: Vec<(String, SharedLink)>, loads: Vec<Arc<dyn DcLoad>>) {
    LoadSet {
        links: links.into_iter().map(|(_, link)| link).collect(),
        loads,
    }
    .release()
    .await;
}

async fn drive_source(source: &dyn AcSource, action: InputAction, setpoint: AcSetpoint) -> Result<()> {
    match action {
        InputAction::PowerOn | InputAction::Change => {
            source.set_voltage(setpoint.voltage).await?;
            source.set_frequency(setpoint.frequency).await?;
            source.set_phase_on(setpoint.phase).await?;
            if action == InputAction::PowerOn {
                source.set_output(true).await?;
            }
        }
        InputAction::PowerOff => {
            source.set_voltage(0.0).await?;
            source.set_output(false).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::config::{ChannelBinding, DataRow, DynamicMeta, LoadMeta};
    use benchlib_core::transport::TransportChannel;
    use benchlib_test_harness::MockChannelProvider;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        warnings: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn warnings(&self) -> Vec<String> {
            lock(&self.warnings).clone()
        }
    }

    impl MessageSink for RecordingSink {
        fn info(&self, _title: &str, _message: &str) {}

        fn warning(&self, title: &str, message: &str) {
            assert_eq!(title, ERROR_TITLE);
            lock(&self.warnings).push(message.to_string());
        }

        fn error(&self, _title: &str, message: &str) {
            lock(&self.warnings).push(message.to_string());
        }
    }

    struct Bench {
        orchestrator: InstrumentOrchestrator,
        provider: Arc<MockChannelProvider>,
        sink: Arc<RecordingSink>,
        events: broadcast::Receiver<OrchestratorEvent>,
    }

    fn bench() -> Bench {
        let provider = Arc::new(MockChannelProvider::new());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator =
            InstrumentOrchestrator::new(provider.clone(), sink.clone(), Timings::default());
        let events = orchestrator.subscribe();
        Bench {
            orchestrator,
            provider,
            sink,
            events,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn record(name: &str, role: InstrumentRole, model: &str, address: &str) -> InstrumentRecord {
        InstrumentRecord {
            enabled: true,
            name: name.into(),
            role,
            model_name: model.into(),
            address: address.into(),
            channels: Vec::new(),
            channel_numbers: Vec::new(),
        }
    }

    fn scope_config(addresses: &[&str]) -> ConfigSnapshot {
        ConfigSnapshot {
            instruments: addresses
                .iter()
                .enumerate()
                .map(|(i, a)| record(&format!("Scope{i}"), InstrumentRole::Oscilloscope, "DPO7000", a))
                .collect(),
            ..Default::default()
        }
    }

    fn load_record(address: &str, bindings: &[(&str, i32, i32)]) -> InstrumentRecord {
        let mut r = record("Load", InstrumentRole::Load, "6310", address);
        r.channels = bindings
            .iter()
            .map(|(sub, index, _)| ChannelBinding {
                sub_model: sub.to_string(),
                ui_index: *index,
            })
            .collect();
        r.channel_numbers = bindings.iter().map(|(_, _, hw)| *hw).collect();
        r
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn load_params() -> BenchParameters {
        BenchParameters {
            load_meta: LoadMeta {
                vo: strings(&["12", "12", "12", "12", "12"]),
                ..Default::default()
            },
            load_rows: vec![DataRow {
                label: "Full".into(),
                values: strings(&["1", "2", "1", "1", "1"]),
            }],
            dynamic_meta: DynamicMeta {
                vo: strings(&["5"]),
                t1t2: strings(&["0.1~0.2"]),
                ..Default::default()
            },
            dynamic_rows: vec![DataRow {
                label: "Step".into(),
                values: strings(&["0.5~1"]),
            }],
            input_rows: Vec::new(),
        }
    }

    #[test]
    fn apply_state_transitions() {
        let mut st = ApplyState::default();
        assert_eq!(st.phase(), ApplyPhase::Idle);

        let first = st.schedule(ConfigSnapshot::default());
        let second = st.schedule(ConfigSnapshot {
            load_outputs: 2,
            ..Default::default()
        });
        assert_eq!(st.phase(), ApplyPhase::Pending);
        assert!(st.begin(first).is_none());
        assert_eq!(st.begin(second).map(|c| c.load_outputs), Some(2));
        assert_eq!(st.phase(), ApplyPhase::Processing);

        // A change during the run is queued behind it.
        let third = st.schedule(ConfigSnapshot {
            load_outputs: 3,
            ..Default::default()
        });
        assert_eq!(st.phase(), ApplyPhase::Pending);
        assert!(st.begin(third).is_none());
        assert_eq!(st.phase(), ApplyPhase::Pending);
        assert_eq!(st.finish().map(|c| c.load_outputs), Some(3));
        assert_eq!(st.phase(), ApplyPhase::Processing);
        assert!(st.finish().is_none());
        assert_eq!(st.phase(), ApplyPhase::Idle);
    }

    #[test]
    fn change_whose_timer_has_not_fired_waits_for_it() {
        let mut st = ApplyState::default();
        let first = st.schedule(ConfigSnapshot::default());
        assert!(st.begin(first).is_some());
        let second = st.schedule(ConfigSnapshot::default());
        assert!(st.finish().is_none());
        assert_eq!(st.phase(), ApplyPhase::Pending);
        assert!(st.begin(second).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_applied_once_with_the_last_snapshot() {
        let mut b = bench();
        for i in 1..=5 {
            b.orchestrator
                .submit_config(scope_config(&[&format!("TCPIP::10.0.0.{i}:4000")]));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let events = drain(&mut b.events);
        let started = events
            .iter()
            .filter(|e| **e == OrchestratorEvent::ApplyStarted)
            .count();
        assert_eq!(started, 1);
        assert!(events.contains(&OrchestratorEvent::ApplyFinished {
            success: true,
            instruments: 1,
        }));
        assert_eq!(b.provider.created_count(), 1);
        assert_eq!(b.provider.handles_for("TCPIP::10.0.0.5:4000").len(), 1);
        assert_eq!(b.orchestrator.apply_phase(), ApplyPhase::Idle);
        assert!(b.orchestrator.oscilloscope("dpo7000").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_apply_replaces_previous_scopes() {
        let b = bench();
        b.orchestrator.submit_config(scope_config(&["TCPIP::10.0.0.1:4000"]));
        tokio::time::sleep(Duration::from_secs(1)).await;
        b.orchestrator.submit_config(scope_config(&["TCPIP::10.0.0.2:4000"]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!b.provider.handles_for("TCPIP::10.0.0.1:4000")[0].is_open());
        assert!(b.provider.handles_for("TCPIP::10.0.0.2:4000")[0].is_open());
        assert_eq!(b.orchestrator.instrument_names(), vec!["Scope0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_apply_keeps_previous_scopes() {
        let mut b = bench();
        b.orchestrator.submit_config(scope_config(&["TCPIP::10.0.0.1:4000"]));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = b.orchestrator.oscilloscope("DPO7000").unwrap();
        drain(&mut b.events);

        b.provider.fail_open("TCPIP::10.0.0.3:4000");
        b.orchestrator.submit_config(scope_config(&[
            "TCPIP::10.0.0.2:4000",
            "TCPIP::10.0.0.3:4000",
        ]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            drain(&mut b.events),
            vec![
                OrchestratorEvent::ApplyStarted,
                OrchestratorEvent::ApplyFinished {
                    success: false,
                    instruments: 1,
                },
            ]
        );
        let after = b.orchestrator.oscilloscope("DPO7000").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_connected().await);
        let rolled_back = &b.provider.handles_for("TCPIP::10.0.0.2:4000")[0];
        assert!(!rolled_back.is_open());
        assert!(!rolled_back.channel_alive());
        assert_eq!(b.sink.warnings(), vec!["DPO7000 communication open failed!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_scope_address_fails_apply() {
        let mut b = bench();
        b.provider.reject("bogus");
        b.orchestrator.submit_config(scope_config(&["bogus"]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(drain(&mut b.events).contains(&OrchestratorEvent::ApplyFinished {
            success: false,
            instruments: 0,
        }));
        assert!(b.sink.warnings()[0].starts_with("Communication format error."));
    }

    #[tokio::test]
    async fn load_on_programs_every_bound_channel_then_releases() {
        let mut b = bench();
        b.orchestrator.submit_config(ConfigSnapshot {
            instruments: vec![load_record("7", &[("63101", 1, 1), ("63103", 2, 2), ("", 3, 3)])],
            ..Default::default()
        });
        b.orchestrator.set_parameters(load_params());
        b.orchestrator.select(LoadKind::Load, "Full");

        b.orchestrator.execute_load(LoadAction::LoadOn).await.unwrap();

        assert_eq!(
            b.provider.sent_to("7"),
            vec![
                "CHAN 1",
                "MODE CCL",
                "CURR:STAT:L1 1",
                "CURR:STAT:L2 1",
                "LOAD ON",
                "CHAN 2",
                "MODE CCL",
                "CURR:STAT:L1 2",
                "CURR:STAT:L2 2",
                "LOAD ON",
            ]
        );
        assert_eq!(b.provider.created_count(), 1);
        assert_eq!(b.provider.open_count(), 0);
        assert_eq!(b.provider.live_count(), 0);
        assert!(drain(&mut b.events).contains(&OrchestratorEvent::ActionCompleted {
            kind: LoadKind::Load,
        }));
    }

    #[tokio::test]
    async fn load_off_switches_channels_off() {
        let b = bench();
        b.orchestrator.submit_config(ConfigSnapshot {
            instruments: vec![load_record("7", &[("63101", 1, 4)])],
            ..Default::default()
        });
        b.orchestrator.select(LoadKind::Load, "Missing row");

        b.orchestrator.execute_load(LoadAction::LoadOff).await.unwrap();
        assert_eq!(b.provider.sent_to("7"), vec!["CHAN 4", "LOAD OFF"]);
    }

    #[test_log::test(tokio::test)]
    async fn connect_failure_rolls_back_every_load() {
        let mut b = bench();
        let instruments = (1..=5)
            .map(|i| load_record(&i.to_string(), &[("63101", i, i)]))
            .collect();
        b.orchestrator.submit_config(ConfigSnapshot {
            instruments,
            ..Default::default()
        });
        b.orchestrator.set_parameters(load_params());
        b.orchestrator.select(LoadKind::Load, "Full");
        b.provider.fail_open("3");

        let err = b
            .orchestrator
            .execute_load(LoadAction::LoadOn)
            .await
            .unwrap_err();

        assert_eq!(operator_message(&err), "6310 communication open failed!");
        assert_eq!(b.provider.created_count(), 3);
        assert_eq!(b.provider.open_count(), 0);
        assert_eq!(b.provider.live_count(), 0);
        assert!(b.provider.sent_to("1").is_empty());
        assert_eq!(b.sink.warnings(), vec!["6310 communication open failed!"]);
        assert!(drain(&mut b.events).contains(&OrchestratorEvent::ForceOff {
            kind: LoadKind::Load,
        }));
    }

    #[tokio::test]
    async fn unsupported_load_address_fails_whole_action() {
        let b = bench();
        b.provider.reject("nowhere");
        b.orchestrator.submit_config(ConfigSnapshot {
            instruments: vec![
                load_record("7", &[("63101", 1, 1)]),
                load_record("nowhere", &[("63101", 2, 2)]),
            ],
            ..Default::default()
        });
        b.orchestrator.set_parameters(load_params());
        b.orchestrator.select(LoadKind::Load, "Full");

        assert!(b.orchestrator.execute_load(LoadAction::LoadOn).await.is_err());
        assert!(b.sink.warnings()[0].starts_with("Communication format error."));
        assert_eq!(b.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn no_bound_channels_is_reported() {
        let b = bench();
        b.orchestrator.submit_config(ConfigSnapshot {
            instruments: vec![load_record("7", &[("63101", 0, 1), ("99999", 1, 2)])],
            ..Default::default()
        });
        b.orchestrator.select(LoadKind::DyLoad, "Step");

        assert!(b.orchestrator.execute_dy_load(DyLoadAction::DyLoadOn).await.is_err());
        assert_eq!(b.sink.warnings(), vec![NO_DYNAMIC_LOADS]);
        assert_eq!(b.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn dynamic_load_on() {
        let b = bench();
        b.orchestrator.submit_config(ConfigSnapshot {
            instruments: vec![load_record("8", &[("63101", 1, 3)])],
            ..Default::default()
        });
        b.orchestrator.set_parameters(load_params());
        b.orchestrator.select(LoadKind::DyLoad, "Step");

        b.orchestrator
            .execute_dy_load(DyLoadAction::DyLoadOn)
            .await
            .unwrap();
        assert_eq!(
            b.provider.sent_to("8"),
            vec![
                "CHAN 3",
                "MODE CCDL",
                "CURR:DYN:L1 0.5",
                "CURR:DYN:L2 1",
                "CURR:DYN:T1 0.1",
                "CURR:DYN:T2 0.2",
                "LOAD ON",
            ]
        );
    }

    fn source_config() -> ConfigSnapshot {
        ConfigSnapshot {
            instruments: vec![record(
                SOURCE_RECORD,
                InstrumentRole::InputSource,
                "DE-A3000AB",
                "COM3",
            )],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn input_power_on_and_off() {
        let mut b = bench();
        b.orchestrator.submit_config(source_config());
        b.orchestrator.select(LoadKind::Input, "90/60/0");

        b.orchestrator.execute_input(InputAction::PowerOn).await.unwrap();
        b.orchestrator.execute_input(InputAction::PowerOff).await.unwrap();

        assert_eq!(
            b.provider.sent_to("COM3"),
            vec![
                "SOURce:VOLTage:AC 90.000",
                "SOURce:FREQuency 60.000",
                "SOURce:PHASe:ON 0.000",
                "OUTPut ON",
                "SOURce:VOLTage:AC 0.000",
                "OUTPut OFF",
            ]
        );
        assert_eq!(b.provider.open_count(), 0);
        let completed = drain(&mut b.events)
            .into_iter()
            .filter(|e| {
                *e == OrchestratorEvent::ActionCompleted {
                    kind: LoadKind::Input,
                }
            })
            .count();
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn input_change_leaves_output_alone() {
        let b = bench();
        b.orchestrator.submit_config(source_config());
        b.orchestrator.select(LoadKind::Input, "110/50/90");

        let handle = b.orchestrator.spawn_input(InputAction::Change);
        handle.await.unwrap().unwrap();
        assert_eq!(
            b.provider.sent_to("COM3"),
            vec![
                "SOURce:VOLTage:AC 110.000",
                "SOURce:FREQuency 50.000",
                "SOURce:PHASe:ON 90.000",
            ]
        );
    }

    #[tokio::test]
    async fn input_validation_messages() {
        let b = bench();
        b.orchestrator.select(LoadKind::Input, "90/60/0");
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        let mut config = source_config();
        b.orchestrator.submit_config(config.clone());
        b.orchestrator.select(LoadKind::Input, " ");
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        b.orchestrator.select(LoadKind::Input, "90/60");
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        b.orchestrator.select(LoadKind::Input, "90/60/0");
        config.instruments[0].enabled = false;
        b.orchestrator.submit_config(config.clone());
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        config.instruments[0].enabled = true;
        config.instruments[0].address.clear();
        b.orchestrator.submit_config(config.clone());
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        config.instruments[0].name = "Other".into();
        b.orchestrator.submit_config(config.clone());
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        config = source_config();
        config.instruments[0].model_name = "DPO7000".into();
        b.orchestrator.submit_config(config.clone());
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        b.provider.fail_open("COM3");
        b.orchestrator.submit_config(source_config());
        assert!(b.orchestrator.execute_input(InputAction::PowerOn).await.is_err());

        assert_eq!(
            b.sink.warnings(),
            vec![
                NO_SETTINGS,
                NO_INPUT,
                "Input format error. voltage/frequency/phase (e.g. 90/60/0)",
                POWER_DISABLED,
                NOT_SPECIFIED,
                NO_POWER,
                SOURCE_FAILED,
                "DE-A3000AB communication open failed!",
            ]
        );
        assert_eq!(b.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn load_validation_messages() {
        let b = bench();
        b.orchestrator.select(LoadKind::Load, "Full");
        assert!(b.orchestrator.execute_load(LoadAction::LoadOn).await.is_err());

        b.orchestrator.submit_config(ConfigSnapshot {
            instruments: vec![load_record("7", &[("63101", 1, 1)])],
            ..Default::default()
        });
        b.orchestrator.select(LoadKind::Load, "");
        assert!(b.orchestrator.execute_load(LoadAction::LoadOn).await.is_err());
        assert!(b.orchestrator.execute_dy_load(DyLoadAction::DyLoadOn).await.is_err());

        assert_eq!(
            b.sink.warnings(),
            vec![NO_SETTINGS, NO_LOAD_SELECTION, NO_DYNAMIC_SELECTION]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_apply_and_closes_scopes() {
        let mut b = bench();
        b.orchestrator.submit_config(scope_config(&["TCPIP::10.0.0.1:4000"]));
        tokio::time::sleep(Duration::from_secs(1)).await;
        b.orchestrator.submit_config(scope_config(&["TCPIP::10.0.0.2:4000"]));
        b.orchestrator.shutdown().await;
        drain(&mut b.events);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(drain(&mut b.events).is_empty());
        assert_eq!(b.provider.open_count(), 0);
        assert!(b.orchestrator.oscilloscope("DPO7000").is_none());
    }
    struct FaultyProvider;

    impl ChannelProvider for FaultyProvider {
        fn create(&self, _address: &str) -> Option<Box<dyn TransportChannel>> {
            panic!("channel table corrupted");
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn apply_panic_is_reported_and_state_recovers() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator =
            InstrumentOrchestrator::new(Arc::new(FaultyProvider), sink.clone(), Timings::default());
        let mut events = orchestrator.subscribe();

        orchestrator.submit_config(scope_config(&["TCPIP::10.0.0.1:4000"]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let events = drain(&mut events);
        assert_eq!(events.first(), Some(&OrchestratorEvent::ApplyStarted));
        assert!(events.contains(&OrchestratorEvent::Error {
            message: APPLY_ABORTED.into(),
        }));
        assert_eq!(sink.warnings(), vec![APPLY_ABORTED.to_string()]);
        assert_eq!(orchestrator.apply_phase(), ApplyPhase::Idle);
        assert!(orchestrator.instrument_names().is_empty());
    }

    #[test]
    fn aborted_run_drops_only_the_snapshot_queued_behind_it() {
        let mut st = ApplyState::default();
        let first = st.schedule(ConfigSnapshot::default());
        assert!(st.begin(first).is_some());
        let second = st.schedule(ConfigSnapshot::default());
        assert!(st.begin(second).is_none());
        st.abort();
        assert_eq!(st.phase(), ApplyPhase::Idle);

        let third = st.schedule(ConfigSnapshot::default());
        assert!(st.begin(third).is_some());
        let fourth = st.schedule(ConfigSnapshot::default());
        st.abort();
        assert_eq!(st.phase(), ApplyPhase::Pending);
        assert!(st.begin(fourth).is_some());
    }
}
