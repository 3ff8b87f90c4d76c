//! Code for the configuration of the emulator.
//!
//! The configuration is persisted as JSON. A hand written `.toml` file is
//! accepted too.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
};

use anyhow::{bail, Context, Result};
use flashforge::{
    material::{is_hex_color, SlotInfo},
    mode::PrinterMode,
    status::{FileListFraming, Persona},
};
use serde::{Deserialize, Serialize};

use crate::{
    fault::NetworkFaultConfig,
    state::{
        files::{FileRegistry, DEFAULT_FILES},
        material_station::{MaterialStation, SLOT_COUNT},
        thermal, BuildVolume, CumulativeStats, Identity, PrinterState, DEFAULT_IDLE_BED, DEFAULT_IDLE_HOTEND,
    },
};

/// The configuration of the emulator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Who the printer claims to be.
    pub printer: PrinterConfig,
    /// The emulated model.
    pub mode: PrinterMode,
    /// Protocol dialect.
    pub persona: Persona,
    /// `~M661` framing.
    pub file_list_framing: FileListFraming,
    /// HTTP check code.
    pub check_code: String,
    /// Temperatures heaters rest at when off.
    pub idle_temperatures: IdleTemperatures,
    /// Files present at startup.
    pub virtual_files: Vec<String>,
    /// PNG served as the thumbnail of every file.
    pub thumbnail_path: Option<std::path::PathBuf>,
    /// Lifetime counters.
    pub stats: CumulativeStats,
    /// Fault injection on the command port.
    pub network: NetworkFaultConfig,
    /// Listener ports.
    pub ports: PortsConfig,
    /// Address the listeners bind to.
    pub bind_address: IpAddr,
    /// Whether discovery probes are answered.
    pub discovery_enabled: bool,
    /// Material station slots. Defaults to a stocked station.
    pub material_slots: Option<Vec<SlotInfo>>,
}

/// Identity settings. Unset names are derived from the mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Printer name, e.g. `FlashForge Adventurer 5M Pro`.
    pub name: Option<String>,
    /// Serial number.
    pub serial_number: String,
    /// Machine type reported by `~M115`.
    pub machine_type: Option<String>,
    /// Firmware version.
    pub firmware_version: String,
    /// MAC address.
    pub mac_address: String,
    /// The address discovery answers from. Detected when unset.
    pub ip_address: Option<IpAddr>,
    /// Printable area.
    pub build_volume: BuildVolume,
    /// Number of extruders.
    pub tool_count: u32,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        PrinterConfig {
            name: None,
            serial_number: "FF3DP123456789".to_string(),
            machine_type: None,
            firmware_version: "1.2.3".to_string(),
            mac_address: "88:A9:A7:90:5C:41".to_string(),
            ip_address: None,
            build_volume: BuildVolume { x: 200, y: 200, z: 200 },
            tool_count: 1,
        }
    }
}

/// Idle heater temperatures, °C.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IdleTemperatures {
    /// Hotend.
    pub hotend: f64,
    /// Bed.
    pub bed: f64,
}

impl Default for IdleTemperatures {
    fn default() -> Self {
        IdleTemperatures {
            hotend: DEFAULT_IDLE_HOTEND,
            bed: DEFAULT_IDLE_BED,
        }
    }
}

/// Listener ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PortsConfig {
    /// UDP discovery.
    pub discovery: u16,
    /// TCP command protocol.
    pub command: u16,
    /// HTTP API.
    pub http: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        PortsConfig {
            discovery: 48899,
            command: 8899,
            http: 8898,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            printer: PrinterConfig::default(),
            mode: PrinterMode::default(),
            persona: Persona::default(),
            file_list_framing: FileListFraming::default(),
            check_code: "12345678".to_string(),
            idle_temperatures: IdleTemperatures::default(),
            virtual_files: DEFAULT_FILES.iter().map(|f| f.to_string()).collect(),
            thumbnail_path: None,
            stats: CumulativeStats::default(),
            network: NetworkFaultConfig::default(),
            ports: PortsConfig::default(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            discovery_enabled: true,
            material_slots: None,
        }
    }
}

impl Config {
    /// Read a configuration file. `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn from_file(file: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(file).with_context(|| format!("reading config {}", file.display()))?;
        let config = if file.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(&contents)?
        } else {
            Self::from_str(&contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_str(config: &str) -> Result<Self> {
        Ok(serde_json::from_str(config)?)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, file: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(file, json).with_context(|| format!("writing config {}", file.display()))?;
        Ok(())
    }

    /// Reject settings the emulator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.printer.serial_number.trim().is_empty() {
            bail!("serial number must not be empty");
        }
        if self.check_code.trim().is_empty() {
            bail!("check code must not be empty");
        }
        for (name, value) in [
            ("hotend", self.idle_temperatures.hotend),
            ("bed", self.idle_temperatures.bed),
        ] {
            if !thermal::valid_target(value) {
                bail!("idle {name} temperature must be between 0 and 300, got {value}");
            }
        }
        self.network.validate().map_err(anyhow::Error::msg)?;

        if let Some(slots) = &self.material_slots {
            if slots.len() != usize::from(SLOT_COUNT) {
                bail!("material station needs exactly {SLOT_COUNT} slots, got {}", slots.len());
            }
            for (index, slot) in slots.iter().enumerate() {
                if usize::from(slot.slot_id) != index + 1 {
                    bail!("material slot {} must have slot id {}", index, index + 1);
                }
                if !is_hex_color(&slot.material_color) {
                    bail!("material slot {} has invalid color {:?}", slot.slot_id, slot.material_color);
                }
            }
        }
        Ok(())
    }

    /// The identity block, with mode-derived names filled in.
    pub fn identity(&self) -> Identity {
        let printer = &self.printer;
        Identity {
            name: printer
                .name
                .clone()
                .unwrap_or_else(|| self.mode.printer_name("FlashForge Adventurer")),
            serial_number: printer.serial_number.clone(),
            machine_type: printer.machine_type.clone().unwrap_or_else(|| self.mode.machine_type()),
            firmware_version: printer.firmware_version.clone(),
            mac_address: printer.mac_address.clone(),
            ip_address: printer.ip_address.unwrap_or_else(crate::net::primary_ip),
            build_volume: printer.build_volume,
            tool_count: printer.tool_count,
        }
    }

    /// Build the printer this configuration describes.
    pub fn build_state(&self) -> Result<PrinterState> {
        self.validate()?;

        let mut state = PrinterState::new(self.identity(), self.mode);
        state.persona = self.persona;
        state.file_list_framing = self.file_list_framing;
        state.check_code = self.check_code.clone();
        state.discovery_enabled = self.discovery_enabled;
        state.stats = self.stats;
        // A fresh printer sits at its idle temperatures.
        let idle = self.idle_temperatures;
        state.restore_heaters(thermal::Heater::idle_at(idle.hotend), thermal::Heater::idle_at(idle.bed));
        state.set_network(self.network.clone())?;
        *state.files_mut() = FileRegistry::with_names(&self.virtual_files);

        if let Some(slots) = &self.material_slots {
            if let Ok(station) = state.material_station_mut() {
                *station = MaterialStation::new(slots.clone());
            }
        }

        if let Some(path) = &self.thumbnail_path {
            match std::fs::read(path) {
                Ok(png) => state.set_default_thumbnail(Some(png)),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "could not read thumbnail"),
            }
        }

        Ok(state)
    }

    /// Capture the persistent parts of a running printer.
    pub fn snapshot(&self, state: &PrinterState) -> Config {
        let thermal = state.thermal();
        Config {
            mode: state.mode(),
            persona: state.persona,
            file_list_framing: state.file_list_framing,
            check_code: state.check_code.clone(),
            idle_temperatures: IdleTemperatures {
                hotend: thermal.hotend.idle,
                bed: thermal.bed.idle,
            },
            virtual_files: state.files().names(),
            stats: state.stats,
            network: state.network().clone(),
            discovery_enabled: state.discovery_enabled,
            material_slots: state
                .material_station()
                .map(|station| station.slots().to_vec())
                .or_else(|| self.material_slots.clone()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_config_from_str_defaults() {
        let config = Config::from_str(r#"{"mode": "5M_Pro", "check_code": "abcd"}"#).unwrap();
        assert_eq!(config.mode, PrinterMode::FiveMPro);
        assert_eq!(config.check_code, "abcd");
        assert_eq!(config.ports.command, 8899);
        assert_eq!(config.virtual_files.len(), 3);
        assert!(config.discovery_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_build_state_starts_at_idle() {
        let config = Config {
            idle_temperatures: IdleTemperatures { hotend: 60.0, bed: 45.0 },
            ..Default::default()
        };
        let state = config.build_state().unwrap();
        let thermal = state.thermal();
        assert_eq!(thermal.hotend.current, 60.0);
        assert_eq!(thermal.hotend.idle, 60.0);
        assert_eq!(thermal.bed.current, 45.0);
        assert_eq!(thermal.hotend.target, 0.0);
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            mode = "5M"
            persona = "legacy"
            file_list_framing = "binary"

            [printer]
            name = "Bench Printer"
            serial_number = "SN42"

            [network]
            failures_enabled = true
            failure_rate = 25
            failure_kind = "timeout"
        "#,
        )
        .unwrap();
        assert_eq!(config.persona, Persona::Legacy);
        assert_eq!(config.file_list_framing, FileListFraming::Binary);
        assert_eq!(config.network.failure_rate, 25);
        assert_eq!(config.network.timeout_stall_ms, 10_000);
        assert_eq!(config.identity().name, "Bench Printer");
    }

    #[test]
    fn test_identity_names_follow_mode() {
        let config = Config {
            mode: PrinterMode::FiveMPro,
            ..Default::default()
        };
        let identity = config.identity();
        assert_eq!(identity.name, "FlashForge Adventurer 5M Pro");
        assert_eq!(identity.machine_type, "Adventurer 5M Pro");
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Config::default();
        config.check_code = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.idle_temperatures.bed = 400.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.failure_rate = 150;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.material_slots = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_and_snapshot() {
        let mut config = Config::default();
        config.printer.ip_address = Some("127.0.0.1".parse().unwrap());
        config.virtual_files = vec!["a.gcode".to_string()];

        let mut state = config.build_state().unwrap();
        state.files_mut().add("b").unwrap();
        state.stats.print_time_minutes = 90;

        let snapshot = config.snapshot(&state);
        assert_eq!(snapshot.virtual_files, vec!["a.gcode", "b.3mf"]);
        assert_eq!(snapshot.stats.print_time_minutes, 90);
        assert_eq!(snapshot.material_slots.as_ref().map(|s| s.len()), Some(4));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(Config::from_str(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("flashforge-emulator-{}.json", std::process::id()));
        let config = Config {
            check_code: "save-me".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
