//! JSON models of the HTTP API on port 8898.
//!
//! Every response is an [`Envelope`]: `{code, message, ...extra}`. Field
//! names follow the printer firmware, hence the camelCase renames.

use serde::{Deserialize, Serialize};

use crate::{
    material::{SlotInfo, ToolData},
    mode::ModeFeatures,
};

/// The `{code, message, ...}` wrapper around every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `0` on success.
    pub code: i32,
    /// `Success`, or a description of the failure.
    pub message: String,
    /// Extra top level fields.
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Code of a successful response.
    pub const OK: i32 = 0;
    /// Code of a rejected request.
    pub const FAILED: i32 = 1;
    /// Code used when the request could not be decoded or handled at all.
    pub const INTERNAL: i32 = 500;

    /// A bare success. Clients check the message text, so it is always
    /// exactly `Success`.
    pub fn success() -> Self {
        Envelope {
            code: Self::OK,
            message: "Success".to_string(),
            data: Default::default(),
        }
    }

    /// A failure with the given code.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Envelope {
            code,
            message: message.into(),
            data: Default::default(),
        }
    }

    /// A rejected request.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::failure(Self::FAILED, message)
    }

    /// Credentials did not match.
    pub fn auth_failed() -> Self {
        Self::rejected("Authentication failed")
    }

    /// Add an extra top level field.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key.to_string(), value);
                self
            }
            Err(err) => Self::failure(Self::INTERNAL, err.to_string()),
        }
    }

    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        self.code == Self::OK
    }
}

/// Credentials carried in every JSON request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Printer serial number.
    #[serde(default)]
    pub serial_number: String,
    /// The check code shown on the printer screen.
    #[serde(default)]
    pub check_code: String,
}

/// Body of the routes that take nothing but credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Request credentials.
    #[serde(flatten)]
    pub credentials: Credentials,
}

/// Body of `/gcodeThumb`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    /// Request credentials.
    #[serde(flatten)]
    pub credentials: Credentials,
    /// The stored file.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Body of `/printGcode`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRequest {
    /// Request credentials.
    #[serde(flatten)]
    pub credentials: Credentials,
    /// The stored file to print.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Level the bed first.
    #[serde(default)]
    pub leveling_before_print: bool,
    /// Feed the job from the material station.
    #[serde(default)]
    pub use_matl_station: bool,
    /// Raw mappings, validated by [`crate::material::parse_material_mappings`].
    #[serde(default)]
    pub material_mappings: serde_json::Value,
}

/// Body of `/control`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Request credentials.
    #[serde(flatten)]
    pub credentials: Credentials,
    /// The command.
    #[serde(default)]
    pub payload: ControlPayload,
}

/// The `payload` of a `/control` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPayload {
    /// Command name, e.g. `lightControl_cmd`.
    #[serde(default)]
    pub cmd: String,
    /// Command arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// An `open`/`close` switch as used by the control commands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    /// On.
    #[serde(alias = "on")]
    Open,
    /// Off.
    #[default]
    #[serde(alias = "off")]
    Close,
}

impl Switch {
    /// `true` for [`Switch::Open`].
    pub fn is_open(self) -> bool {
        self == Switch::Open
    }
}

impl From<bool> for Switch {
    fn from(on: bool) -> Self {
        if on {
            Switch::Open
        } else {
            Switch::Close
        }
    }
}

/// Action of `jobCtl_cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    /// Pause the running job.
    Pause,
    /// Resume a paused job.
    #[serde(rename = "continue")]
    Resume,
    /// Cancel the job.
    Cancel,
}

/// Arguments of `lightControl_cmd`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightArgs {
    /// Light state.
    #[serde(default)]
    pub status: Switch,
}

/// Arguments of `printerCtl_cmd`. Absent fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterArgs {
    /// Print speed adjustment, percent.
    #[serde(default)]
    pub speed: Option<u32>,
    /// Z offset in millimetres.
    #[serde(default)]
    pub z_axis_compensation: Option<f64>,
    /// Chamber fan speed, percent.
    #[serde(default)]
    pub chamber_fan: Option<u32>,
    /// Part cooling fan speed, percent.
    #[serde(default)]
    pub cooling_fan: Option<u32>,
}

/// Arguments of `jobCtl_cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArgs {
    /// What to do with the job.
    pub action: JobAction,
}

/// Arguments of `circulateCtl_cmd`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CirculationArgs {
    /// Internal circulation fan.
    #[serde(default)]
    pub internal: Switch,
    /// External exhaust fan.
    #[serde(default)]
    pub external: Switch,
}

/// Arguments of `streamCtrl_cmd`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamArgs {
    /// Camera stream state.
    #[serde(default)]
    pub action: Switch,
}

/// Arguments of `temperatureCtl_cmd`. Absent fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureArgs {
    /// Hotend target.
    #[serde(default)]
    pub extruder_temp: Option<f64>,
    /// Bed target.
    #[serde(default)]
    pub bed_temp: Option<f64>,
    /// Chamber target.
    #[serde(default)]
    pub chamber_temp: Option<f64>,
}

/// A decoded `/control` command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args")]
pub enum ControlCommand {
    /// Chamber light.
    #[serde(rename = "lightControl_cmd")]
    Light(LightArgs),
    /// Speed, offsets and fans.
    #[serde(rename = "printerCtl_cmd")]
    Printer(PrinterArgs),
    /// Pause, resume or cancel the job.
    #[serde(rename = "jobCtl_cmd")]
    Job(JobArgs),
    /// Filtration fans.
    #[serde(rename = "circulateCtl_cmd")]
    Circulation(CirculationArgs),
    /// Camera stream.
    #[serde(rename = "streamCtrl_cmd")]
    Stream(StreamArgs),
    /// Heater targets.
    #[serde(rename = "temperatureCtl_cmd")]
    Temperature(TemperatureArgs),
}

/// Why a `/control` payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The command name is not in the table.
    #[error("Unknown command: {0}")]
    Unknown(String),
    /// The arguments did not match the command.
    #[error("Invalid arguments for {cmd}: {source}")]
    InvalidArgs {
        /// The command name.
        cmd: String,
        /// The decode failure.
        source: serde_json::Error,
    },
}

impl ControlCommand {
    /// Every command name the printer accepts.
    pub const NAMES: [&'static str; 6] = [
        "lightControl_cmd",
        "printerCtl_cmd",
        "jobCtl_cmd",
        "circulateCtl_cmd",
        "streamCtrl_cmd",
        "temperatureCtl_cmd",
    ];

    /// Decode a payload. Unknown names are reported before the arguments
    /// are looked at.
    pub fn from_payload(payload: &ControlPayload) -> Result<Self, ControlError> {
        if !Self::NAMES.contains(&payload.cmd.as_str()) {
            return Err(ControlError::Unknown(payload.cmd.clone()));
        }

        let args = match &payload.args {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            args => args.clone(),
        };

        serde_json::from_value(serde_json::json!({ "cmd": payload.cmd, "args": args })).map_err(|source| {
            ControlError::InvalidArgs {
                cmd: payload.cmd.clone(),
                source,
            }
        })
    }
}

/// Control flags reported by `/product`. `1` means the control is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductControlStates {
    /// Chamber temperature control.
    pub chamber_temp_ctrl_state: u8,
    /// External fan control.
    pub external_fan_ctrl_state: u8,
    /// Internal fan control.
    pub internal_fan_ctrl_state: u8,
    /// Light control.
    pub light_ctrl_state: u8,
    /// Nozzle temperature control.
    pub nozzle_temp_ctrl_state: u8,
    /// Bed temperature control.
    pub platform_temp_ctrl_state: u8,
}

impl ProductControlStates {
    /// Flags for a printer with the given hardware. Filtration brings the
    /// chamber and fan controls.
    pub fn for_features(features: ModeFeatures) -> Self {
        let filtration = u8::from(features.filtration);
        ProductControlStates {
            chamber_temp_ctrl_state: filtration,
            external_fan_ctrl_state: filtration,
            internal_fan_ctrl_state: filtration,
            light_ctrl_state: 1,
            nozzle_temp_ctrl_state: 1,
            platform_temp_ctrl_state: 1,
        }
    }
}

/// The material-station block of `/detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatlStationInfo {
    /// Slot currently feeding the extruder.
    pub current_slot: u8,
    /// Slot being loaded, `0` when none.
    pub current_load_slot: u8,
    /// Number of slots.
    pub slot_cnt: u8,
    /// Every slot.
    pub slot_infos: Vec<SlotInfo>,
    /// Station action code.
    pub state_action: u8,
    /// Station step code.
    pub state_step: u8,
}

/// Material in the current slot, reported by `/detail` on the AD5X.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndepMatlInfo {
    /// Material colour.
    pub material_color: String,
    /// Material name.
    pub material_name: String,
    /// Action code.
    pub state_action: u8,
    /// Step code.
    pub state_step: u8,
}

/// One entry of the detailed AD5X `/gcodeList` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcodeListEntry {
    /// File name.
    pub gcode_file_name: String,
    /// Estimated print time in seconds.
    pub printing_time: u64,
    /// Estimated filament use in grams.
    pub total_filament_weight: f64,
    /// Whether the file uses the material station.
    pub use_matl_station: bool,
    /// Number of tools.
    pub gcode_tool_cnt: u32,
    /// Per-tool material use.
    pub gcode_tool_datas: Vec<ToolData>,
}

/// The `detail` object of `/detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detail {
    /// Printer name.
    pub name: String,
    /// Firmware version.
    pub firmware_version: String,
    /// MAC address.
    pub mac_addr: String,
    /// IP address.
    pub ip_addr: String,
    /// Job status name.
    pub status: String,
    /// Lifetime print time in minutes.
    pub cumulative_print_time: u64,
    /// Lifetime filament in metres.
    pub cumulative_filament: f64,
    /// Hotend temperature.
    pub right_temp: f64,
    /// Hotend target.
    pub right_target_temp: f64,
    /// Bed temperature.
    pub plat_temp: f64,
    /// Bed target.
    pub plat_target_temp: f64,
    /// Chamber temperature.
    pub chamber_temp: f64,
    /// Chamber target.
    pub chamber_target_temp: f64,
    /// Part cooling fan, percent.
    pub cooling_fan_speed: u32,
    /// Chamber fan, percent.
    pub chamber_fan_speed: u32,
    /// `open` or `close`.
    pub light_status: String,
    /// `open` or `close`.
    pub door_status: String,
    /// `open` or `close`.
    pub auto_shutdown: String,
    /// Auto shutdown delay, minutes.
    pub auto_shutdown_time: u32,
    /// File being printed.
    pub print_file_name: String,
    /// Progress, percent.
    pub print_progress: f64,
    /// Current layer.
    pub print_layer: u32,
    /// Total layers.
    pub target_print_layer: u32,
    /// Elapsed seconds.
    pub print_duration: u64,
    /// Remaining seconds.
    pub estimated_time: u64,
    /// Loaded material, main extruder.
    pub right_filament_type: String,
    /// Filament present on the main extruder.
    pub has_right_filament: bool,
    /// Loaded material, second extruder.
    pub left_filament_type: String,
    /// Filament present on the second extruder.
    pub has_left_filament: bool,
    /// Error code, empty when healthy.
    pub error_code: String,
    /// Unit system.
    pub measure: String,
    /// Number of nozzles.
    pub nozzle_cnt: u32,
    /// Nozzle size.
    pub nozzle_model: String,
    /// Print speed, mm/s.
    pub current_print_speed: u32,
    /// Speed adjustment, percent.
    pub print_speed_adjust: u32,
    /// Z offset, millimetres.
    pub z_axis_compensation: f64,
    /// Air quality reading.
    pub tvoc: u32,
    /// Free storage in megabytes.
    pub remaining_disk_space: u64,
    /// Estimated filament length, main extruder, metres.
    pub estimated_right_len: f64,
    /// Estimated filament weight, main extruder, grams.
    pub estimated_right_weight: f64,
    /// Estimated filament length, second extruder, metres.
    pub estimated_left_len: f64,
    /// Estimated filament weight, second extruder, grams.
    pub estimated_left_weight: f64,
    /// FlashCloud registration code.
    pub flash_register_code: String,
    /// Polar cloud registration code.
    pub polar_register_code: String,
    /// Whether a material station is fitted.
    pub has_matl_station: bool,
    /// External filtration fan, filtration models only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_fan_status: Option<String>,
    /// Internal filtration fan, filtration models only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_fan_status: Option<String>,
    /// MJPEG stream URL, camera models only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_stream_url: Option<String>,
    /// Second hotend temperature, camera models only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_temp: Option<f64>,
    /// Second hotend target, camera models only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_target_temp: Option<f64>,
    /// Second cooling fan, camera models only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooling_fan_left_speed: Option<u32>,
    /// Material station, AD5X only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matl_station_info: Option<MatlStationInfo>,
    /// Material in the current slot, AD5X only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indep_matl_info: Option<IndepMatlInfo>,
}
