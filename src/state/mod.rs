//! The emulated printer: one aggregate that every protocol surface reads and
//! mutates through explicit operations.

pub mod files;
pub mod material_station;
pub mod progress;
pub mod thermal;

use std::{net::IpAddr, sync::Arc};

use flashforge::{
    http::Credentials,
    material::{MappingError, MaterialMapping},
    mode::PrinterMode,
    status::{FileListFraming, Persona, PrintStatus},
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use self::{
    files::FileRegistry,
    material_station::MaterialStation,
    thermal::{Heater, HeaterKind, Thermal, BED, HOTEND},
};
use crate::fault::NetworkFaultConfig;

/// Grams of 1.75 mm PLA per metre of filament.
pub const GRAMS_PER_METER: f64 = 2.98;

/// Errors returned by state operations. None of them leave a partial
/// mutation behind.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The named file is not stored.
    #[error("File not found: {0}")]
    FileNotFound(String),
    /// A file with that name already exists.
    #[error("File already exists: {0}")]
    DuplicateFile(String),
    /// The name is empty or contains a path separator.
    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),
    /// The operation is not valid from the current print status.
    #[error("Cannot {operation} while {from}")]
    InvalidTransition {
        /// What was attempted.
        operation: &'static str,
        /// The status at the time.
        from: PrintStatus,
    },
    /// A heater target outside 0-300 °C.
    #[error("{heater} target must be between 0 and 300, got {value}")]
    TemperatureOutOfRange {
        /// The heater.
        heater: HeaterKind,
        /// The rejected target.
        value: f64,
    },
    /// The slot id is outside the station.
    #[error("Unknown material slot: {0}")]
    UnknownSlot(u8),
    /// A colour that is not `#RRGGBB`.
    #[error("Invalid color {0:?}, expected #RRGGBB")]
    InvalidColor(String),
    /// The current mode has no material station.
    #[error("Material station is not available on this printer")]
    NoMaterialStation,
    /// Fault injection settings out of range.
    #[error("Invalid network fault settings: {0}")]
    InvalidFaultConfig(String),
    /// Rejected material mappings.
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Printable area, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildVolume {
    /// Width.
    pub x: u32,
    /// Depth.
    pub y: u32,
    /// Height.
    pub z: u32,
}

/// Who the printer says it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Printer name.
    pub name: String,
    /// Serial number, also the HTTP user name.
    pub serial_number: String,
    /// Machine type reported by `~M115`.
    pub machine_type: String,
    /// Firmware version.
    pub firmware_version: String,
    /// MAC address.
    pub mac_address: String,
    /// The address discovery answers from.
    pub ip_address: IpAddr,
    /// Printable area.
    pub build_volume: BuildVolume,
    /// Number of extruders.
    pub tool_count: u32,
}

/// Lights, sensors and fans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hardware {
    /// Chamber light.
    pub led_on: bool,
    /// Filament runout sensor enabled.
    pub filament_sensor: bool,
    /// Camera streaming.
    pub camera_on: bool,
    /// Internal circulation fan.
    pub internal_fan_on: bool,
    /// External exhaust fan.
    pub external_fan_on: bool,
    /// Part cooling fan, percent.
    pub cooling_fan_speed: u32,
    /// Chamber fan, percent.
    pub chamber_fan_speed: u32,
    /// Print speed override, percent.
    pub print_speed_adjust: u32,
    /// Z offset in millimetres.
    pub z_axis_compensation: f64,
}

impl Default for Hardware {
    fn default() -> Self {
        Hardware {
            led_on: false,
            filament_sensor: true,
            camera_on: false,
            internal_fan_on: false,
            external_fan_on: false,
            cooling_fan_speed: 0,
            chamber_fan_speed: 0,
            print_speed_adjust: 100,
            z_axis_compensation: 0.0,
        }
    }
}

/// Head position, in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    /// X.
    pub x: f64,
    /// Y.
    pub y: f64,
    /// Z.
    pub z: f64,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CumulativeStats {
    /// Minutes spent printing.
    pub print_time_minutes: u64,
    /// Metres of filament used.
    pub filament_meters: f64,
}

/// The current (or last) print job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintJob {
    /// Job status.
    pub status: PrintStatus,
    /// File being printed.
    pub file: Option<String>,
    /// Progress, percent.
    pub progress: f64,
    /// Current layer.
    pub layer: u32,
    /// Layers in the file.
    pub total_layers: u32,
    /// Elapsed seconds.
    pub duration: u64,
    /// Remaining seconds.
    pub remaining: u64,
    /// Estimated filament weight, grams.
    pub estimated_weight: f64,
    /// Estimated filament length, metres.
    pub estimated_length: f64,
    /// Bed levelling was requested.
    pub leveling_before_print: bool,
    /// Tool to slot assignments for multi-colour jobs.
    pub material_mappings: Vec<MaterialMapping>,
}

/// Options for [`PrinterState::start_print_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintOptions {
    /// Level the bed first.
    pub leveling_before_print: bool,
    /// Validated material mappings; requires a material station.
    pub material_mappings: Vec<MaterialMapping>,
}

/// Everything the emulated printer knows.
#[derive(Debug, Clone)]
pub struct PrinterState {
    /// Identity block.
    pub identity: Identity,
    /// Protocol dialect.
    pub persona: Persona,
    /// `~M661` framing.
    pub file_list_framing: FileListFraming,
    /// HTTP check code.
    pub check_code: String,
    /// Whether discovery probes are answered.
    pub discovery_enabled: bool,
    /// Lights, sensors and fans.
    pub hardware: Hardware,
    /// Lifetime counters.
    pub stats: CumulativeStats,
    mode: PrinterMode,
    thermal: Thermal,
    position: Position,
    job: PrintJob,
    network: NetworkFaultConfig,
    files: FileRegistry,
    material_station: Option<MaterialStation>,
    thumbnail: Option<Vec<u8>>,
    rng: StdRng,
}

/// Default idle hotend temperature.
pub const DEFAULT_IDLE_HOTEND: f64 = 23.0;
/// Default idle bed temperature.
pub const DEFAULT_IDLE_BED: f64 = 30.0;
/// Chamber temperature.
pub const DEFAULT_CHAMBER: f64 = 25.0;

impl PrinterState {
    /// A freshly booted printer with the default file set.
    pub fn new(identity: Identity, mode: PrinterMode) -> Self {
        PrinterState {
            identity,
            persona: Persona::default(),
            file_list_framing: FileListFraming::default(),
            check_code: String::new(),
            discovery_enabled: true,
            hardware: Hardware::default(),
            stats: CumulativeStats::default(),
            mode,
            thermal: Thermal::new(DEFAULT_IDLE_HOTEND, DEFAULT_IDLE_BED, DEFAULT_CHAMBER),
            position: Position::default(),
            job: PrintJob::default(),
            network: NetworkFaultConfig::default(),
            files: FileRegistry::defaults(),
            material_station: mode.features().material_station.then(MaterialStation::default),
            thumbnail: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Make the simulation deterministic.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The emulated model.
    pub fn mode(&self) -> PrinterMode {
        self.mode
    }

    /// Switch model. A material station is fitted or removed to match.
    pub fn set_mode(&mut self, mode: PrinterMode) {
        self.mode = mode;
        if !mode.features().material_station {
            self.material_station = None;
        } else if self.material_station.is_none() {
            self.material_station = Some(MaterialStation::default());
        }
    }

    /// Whether HTTP credentials match.
    pub fn authenticate(&self, credentials: &Credentials) -> bool {
        credentials.serial_number == self.identity.serial_number && credentials.check_code == self.check_code
    }

    /// Heaters.
    pub fn thermal(&self) -> &Thermal {
        &self.thermal
    }

    /// Set a heater target. `0` turns the heater off.
    pub fn set_target(&mut self, kind: HeaterKind, target: f64) -> Result<(), StateError> {
        if !thermal::valid_target(target) {
            return Err(StateError::TemperatureOutOfRange { heater: kind, value: target });
        }
        self.thermal.heater_mut(kind).target = target;
        Ok(())
    }

    /// Turn a heater off.
    pub fn reset_target(&mut self, kind: HeaterKind) {
        self.thermal.heater_mut(kind).target = 0.0;
    }

    /// Set a heater target and jump straight to it, as if we had waited.
    pub fn set_target_and_wait(&mut self, kind: HeaterKind, target: f64) -> Result<(), StateError> {
        self.set_target(kind, target)?;
        self.thermal.heater_mut(kind).current = target;
        Ok(())
    }

    /// Change the temperatures idle heaters drift to.
    pub fn set_idle_temperatures(&mut self, hotend: f64, bed: f64) -> Result<(), StateError> {
        for (heater, value) in [(HeaterKind::Hotend, hotend), (HeaterKind::Bed, bed)] {
            if !thermal::valid_target(value) {
                return Err(StateError::TemperatureOutOfRange { heater, value });
            }
        }
        self.thermal.hotend.set_idle(hotend, &HOTEND);
        self.thermal.bed.set_idle(bed, &BED);
        Ok(())
    }

    /// Restore heater readings, e.g. from a saved session.
    pub fn restore_heaters(&mut self, hotend: Heater, bed: Heater) {
        self.thermal.hotend = hotend;
        self.thermal.bed = bed;
    }

    /// Head position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Move the head. Absent axes stay put.
    pub fn move_to(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>) {
        self.position.x = x.unwrap_or(self.position.x);
        self.position.y = y.unwrap_or(self.position.y);
        self.position.z = z.unwrap_or(self.position.z);
    }

    /// Home all axes.
    pub fn home(&mut self) {
        self.position = Position::default();
    }

    /// The current job.
    pub fn job(&self) -> &PrintJob {
        &self.job
    }

    /// Job status.
    pub fn status(&self) -> PrintStatus {
        self.job.status
    }

    /// Start printing a stored file.
    pub fn start_print(&mut self, file: &str) -> Result<(), StateError> {
        self.start_print_with(file, PrintOptions::default())
    }

    /// Start printing a stored file with job options.
    pub fn start_print_with(&mut self, file: &str, options: PrintOptions) -> Result<(), StateError> {
        if self.job.status.is_active() {
            return Err(StateError::InvalidTransition {
                operation: "start a print",
                from: self.job.status,
            });
        }
        let stored = self.files.get(file).ok_or_else(|| StateError::FileNotFound(file.to_string()))?;
        if !options.material_mappings.is_empty() {
            if self.material_station.is_none() {
                return Err(StateError::NoMaterialStation);
            }
            flashforge::material::validate_material_mappings(&options.material_mappings)?;
        }

        let metadata = &stored.metadata;
        let total_layers = if metadata.total_layers == 0 { 100 } else { metadata.total_layers };
        self.job = PrintJob {
            status: PrintStatus::Printing,
            file: Some(stored.name.clone()),
            progress: 0.0,
            layer: 0,
            total_layers,
            duration: 0,
            remaining: metadata.printing_time,
            estimated_weight: metadata.total_filament_weight,
            estimated_length: metadata.total_filament_weight / GRAMS_PER_METER,
            leveling_before_print: options.leveling_before_print,
            material_mappings: options.material_mappings,
        };
        tracing::info!(file = file, layers = total_layers, "print started");
        Ok(())
    }

    /// Pause a running job.
    pub fn pause(&mut self) -> Result<(), StateError> {
        self.transition("pause", &[PrintStatus::Printing], PrintStatus::Paused)
    }

    /// Resume a paused job.
    pub fn resume(&mut self) -> Result<(), StateError> {
        self.transition("resume", &[PrintStatus::Paused, PrintStatus::Pausing], PrintStatus::Printing)
    }

    /// Abandon the job and return to ready.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        if !self.job.status.is_active() {
            return Err(StateError::InvalidTransition {
                operation: "cancel",
                from: self.job.status,
            });
        }
        tracing::info!(file = ?self.job.file, "print cancelled");
        self.job = PrintJob::default();
        Ok(())
    }

    /// Return a finished job to ready, keeping nothing.
    pub fn reset(&mut self) -> Result<(), StateError> {
        match self.job.status {
            PrintStatus::Completed | PrintStatus::Cancelled | PrintStatus::Error | PrintStatus::Unknown => {
                self.job = PrintJob::default();
                Ok(())
            }
            from => Err(StateError::InvalidTransition {
                operation: "reset",
                from,
            }),
        }
    }

    fn transition(
        &mut self,
        operation: &'static str,
        from: &[PrintStatus],
        to: PrintStatus,
    ) -> Result<(), StateError> {
        if !from.contains(&self.job.status) {
            return Err(StateError::InvalidTransition {
                operation,
                from: self.job.status,
            });
        }
        tracing::debug!(from = %self.job.status, to = %to, "print status change");
        self.job.status = to;
        Ok(())
    }

    /// Advance the job by one tick (one simulated second). Returns whether
    /// anything changed.
    pub fn tick_progress(&mut self) -> bool {
        if self.job.status != PrintStatus::Printing {
            return false;
        }

        let step = progress::increment(self.persona, &mut self.rng);
        let job = &mut self.job;
        job.progress = (job.progress + step).min(100.0);
        job.duration += 1;
        job.layer = progress::layer_at(job.progress, job.total_layers);
        job.remaining = progress::remaining_time(job.duration, job.progress, job.remaining);

        if job.progress >= 100.0 {
            job.status = PrintStatus::Completed;
            job.remaining = 0;
            job.layer = job.total_layers;
            self.stats.print_time_minutes += job.duration / 60;
            self.stats.filament_meters += job.estimated_length;
            tracing::info!(file = ?job.file, seconds = job.duration, "print completed");
        }
        true
    }

    /// One simulation tick: heaters, then the job.
    pub fn tick(&mut self) {
        self.thermal.step(&mut self.rng);
        self.tick_progress();
    }

    /// Stored files.
    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    /// Stored files, for add/remove/upload.
    pub fn files_mut(&mut self) -> &mut FileRegistry {
        &mut self.files
    }

    /// The material station, when fitted.
    pub fn material_station(&self) -> Option<&MaterialStation> {
        self.material_station.as_ref()
    }

    /// The material station, for slot changes.
    pub fn material_station_mut(&mut self) -> Result<&mut MaterialStation, StateError> {
        self.material_station.as_mut().ok_or(StateError::NoMaterialStation)
    }

    /// Fault injection settings.
    pub fn network(&self) -> &NetworkFaultConfig {
        &self.network
    }

    /// Replace the fault injection settings.
    pub fn set_network(&mut self, network: NetworkFaultConfig) -> Result<(), StateError> {
        network.validate().map_err(StateError::InvalidFaultConfig)?;
        self.network = network;
        Ok(())
    }

    /// Set the thumbnail served for files without their own.
    pub fn set_default_thumbnail(&mut self, png: Option<Vec<u8>>) {
        self.thumbnail = png;
    }

    /// Thumbnail for a file: its own if it has one, else the default.
    pub fn thumbnail_for(&self, file: &str) -> Option<&[u8]> {
        self.files
            .get(file)
            .and_then(|f| f.thumbnail.as_deref())
            .or(self.thumbnail.as_deref())
    }
}

/// Handle to the one [`PrinterState`] shared by every listener.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<Mutex<PrinterState>>);

impl SharedState {
    /// Wrap a state.
    pub fn new(state: PrinterState) -> Self {
        SharedState(Arc::new(Mutex::new(state)))
    }

    /// Lock the state. Keep the guard short lived and never hold it across
    /// network IO.
    pub async fn lock(&self) -> MutexGuard<'_, PrinterState> {
        self.0.lock().await
    }
}

impl From<PrinterState> for SharedState {
    fn from(state: PrinterState) -> Self {
        SharedState::new(state)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) fn identity() -> Identity {
        Identity {
            name: "FlashForge Adventurer 5X".to_string(),
            serial_number: "SNMOMC9900728".to_string(),
            machine_type: "Adventurer 5X".to_string(),
            firmware_version: "1.2.3".to_string(),
            mac_address: "88:A9:A7:00:00:01".to_string(),
            ip_address: "127.0.0.1".parse().unwrap(),
            build_volume: BuildVolume { x: 220, y: 220, z: 220 },
            tool_count: 1,
        }
    }

    pub(crate) fn state(mode: PrinterMode) -> PrinterState {
        let mut state = PrinterState::new(identity(), mode).with_seed(42);
        state.check_code = "12345678".to_string();
        state
    }

    #[test]
    fn test_set_idle_temperatures_nudges_once() {
        let mut state = state(PrinterMode::FiveM);
        let before = state.thermal().hotend.current;
        state.set_idle_temperatures(before + 20.0, state.thermal().bed.current).unwrap();
        assert_eq!(state.thermal().hotend.idle, before + 20.0);
        assert_eq!(state.thermal().hotend.current, before + HOTEND.idle_warm_rate);

        assert!(matches!(
            state.set_idle_temperatures(301.0, 25.0),
            Err(StateError::TemperatureOutOfRange { heater: HeaterKind::Hotend, .. })
        ));
        assert_eq!(state.thermal().hotend.idle, before + 20.0);
    }

    #[test]
    fn test_start_unknown_file() {
        let mut state = state(PrinterMode::FiveM);
        assert!(matches!(state.start_print("nope.gcode"), Err(StateError::FileNotFound(_))));
        assert_eq!(state.status(), PrintStatus::Ready);
        assert_eq!(state.job(), &PrintJob::default());
    }

    #[test]
    fn test_start_known_file() {
        let mut state = state(PrinterMode::FiveM);
        state.start_print("test2.gcode").unwrap();
        assert_eq!(state.status(), PrintStatus::Printing);
        assert_eq!(state.job().progress, 0.0);
        assert_eq!(state.job().file.as_deref(), Some("test2.gcode"));
        assert_eq!(state.job().total_layers, 100);
        assert_eq!(state.job().remaining, 3600);

        assert!(matches!(
            state.start_print("test.3mf"),
            Err(StateError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_pause_resume_cancel() {
        let mut state = state(PrinterMode::FiveM);
        assert!(state.pause().is_err());
        assert!(state.resume().is_err());
        assert!(state.cancel().is_err());

        state.start_print("test.3mf").unwrap();
        state.tick_progress();
        assert!(state.resume().is_err());
        state.pause().unwrap();
        assert_eq!(state.status(), PrintStatus::Paused);
        assert!(!state.tick_progress());
        state.resume().unwrap();
        assert_eq!(state.status(), PrintStatus::Printing);

        state.cancel().unwrap();
        assert_eq!(state.status(), PrintStatus::Ready);
        assert_eq!(state.job().progress, 0.0);
        assert_eq!(state.job().duration, 0);
        assert_eq!(state.job().file, None);
    }

    #[test]
    fn test_tick_progress_is_terminal() {
        let mut state = state(PrinterMode::FiveMPro);
        state.persona = Persona::Legacy;
        state.start_print("test.3mf").unwrap();

        for _ in 0..100 {
            assert!(state.tick_progress());
        }
        assert_eq!(state.status(), PrintStatus::Completed);
        assert_eq!(state.job().progress, 100.0);
        assert_eq!(state.job().remaining, 0);
        assert_eq!(state.job().layer, 100);
        assert_eq!(state.stats.print_time_minutes, 1);

        for _ in 0..10 {
            assert!(!state.tick_progress());
        }
        assert_eq!(state.status(), PrintStatus::Completed);
        assert_eq!(state.job().progress, 100.0);

        state.reset().unwrap();
        assert_eq!(state.status(), PrintStatus::Ready);
    }

    #[test]
    fn test_remaining_time_extrapolates() {
        let mut state = state(PrinterMode::FiveM);
        state.persona = Persona::Legacy;
        state.start_print("test.3mf").unwrap();
        for _ in 0..25 {
            state.tick_progress();
        }
        assert_eq!(state.job().progress, 25.0);
        assert_eq!(state.job().duration, 25);
        assert_eq!(state.job().remaining, 75);
    }

    #[test]
    fn test_five_m_progress_is_fine_grained() {
        let mut state = state(PrinterMode::FiveM);
        state.start_print("test.3mf").unwrap();
        state.tick_progress();
        assert!((0.01..=0.05).contains(&state.job().progress));
    }

    #[test]
    fn test_targets_are_bounded() {
        let mut state = state(PrinterMode::FiveM);
        assert!(state.set_target(HeaterKind::Hotend, 301.0).is_err());
        assert_eq!(state.thermal().hotend.target, 0.0);

        state.set_target_and_wait(HeaterKind::Bed, 60.0).unwrap();
        assert_eq!(state.thermal().bed.current, 60.0);
        assert_eq!(state.thermal().bed.target, 60.0);
    }

    #[test]
    fn test_mode_switch_fits_station() {
        let mut state = state(PrinterMode::FiveM);
        assert!(state.material_station().is_none());
        assert!(matches!(state.material_station_mut(), Err(StateError::NoMaterialStation)));

        state.set_mode(PrinterMode::Ad5x);
        assert!(state.material_station().is_some());
        state.set_mode(PrinterMode::FiveMPro);
        assert!(state.material_station().is_none());
    }

    #[test]
    fn test_mappings_need_station() {
        let mapping = MaterialMapping {
            tool_id: 0,
            slot_id: 1,
            material_name: "PLA".to_string(),
            tool_material_color: "#FF0000".to_string(),
            slot_material_color: "#FF0000".to_string(),
        };
        let options = PrintOptions {
            leveling_before_print: false,
            material_mappings: vec![mapping],
        };

        let mut plain = state(PrinterMode::FiveM);
        assert!(matches!(
            plain.start_print_with("test.3mf", options.clone()),
            Err(StateError::NoMaterialStation)
        ));

        let mut ad5x = state(PrinterMode::Ad5x);
        ad5x.start_print_with("test.3mf", options).unwrap();
        assert_eq!(ad5x.job().material_mappings.len(), 1);
    }

    #[test]
    fn test_authenticate() {
        let state = state(PrinterMode::FiveM);
        assert!(state.authenticate(&Credentials {
            serial_number: "SNMOMC9900728".to_string(),
            check_code: "12345678".to_string(),
        }));
        assert!(!state.authenticate(&Credentials {
            serial_number: "SNMOMC9900728".to_string(),
            check_code: "nope".to_string(),
        }));
    }

    #[test]
    fn test_thumbnail_fallback() {
        let mut state = state(PrinterMode::FiveM);
        assert_eq!(state.thumbnail_for("test.3mf"), None);

        state.set_default_thumbnail(Some(vec![1, 2, 3]));
        state.files_mut().set_thumbnail("test2.gcode", vec![9]).unwrap();
        assert_eq!(state.thumbnail_for("test.3mf"), Some(&[1u8, 2, 3][..]));
        assert_eq!(state.thumbnail_for("test2.gcode"), Some(&[9u8][..]));
    }

    #[tokio::test]
    async fn test_shared_state_serializes_updates() {
        let shared = SharedState::new(state(PrinterMode::FiveM));
        shared.lock().await.start_print("test.3mf").unwrap();

        let other = shared.clone();
        tokio::spawn(async move { other.lock().await.cancel() }).await.unwrap().unwrap();

        let state = shared.lock().await;
        assert_eq!(state.status(), PrintStatus::Ready);
        assert_eq!(state.job().file, None);
    }
}
