//! What each HTTP route does to the printer, independent of the transport.
//!
//! Every function takes the already locked state and answers with an
//! [`Envelope`]; failures are envelopes too.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use flashforge::{
    http::{
        ControlCommand, Credentials, Detail, Envelope, FileRequest, JobAction, PrintRequest, ProductControlStates,
        Switch,
    },
    material::{parse_material_mappings, MaterialMapping, ToolData},
    mode::PrinterMode,
};
use http::HeaderMap;

use crate::state::{
    files::FileMetadata,
    thermal::{self, HeaterKind},
    PrintOptions, PrinterState, StateError,
};

fn switch(on: bool) -> String {
    match Switch::from(on) {
        Switch::Open => "open".to_string(),
        Switch::Close => "close".to_string(),
    }
}

/// `/product`: which controls the printer exposes.
pub fn product(state: &PrinterState) -> Envelope {
    Envelope::success().with("product", ProductControlStates::for_features(state.mode().features()))
}

/// `/detail`: the full status block.
pub fn detail(state: &PrinterState) -> Envelope {
    Envelope::success().with("detail", render_detail(state))
}

/// Assemble the `/detail` block, including the extensions the current mode
/// carries.
pub fn render_detail(state: &PrinterState) -> Detail {
    let features = state.mode().features();
    let thermal = state.thermal();
    let job = state.job();
    let hardware = &state.hardware;
    let identity = &state.identity;
    let station = state.material_station();

    let right_filament = station
        .and_then(|s| s.current_material())
        .map(|m| m.material_name)
        .unwrap_or_else(|| "PLA".to_string());

    Detail {
        name: identity.name.clone(),
        firmware_version: identity.firmware_version.clone(),
        mac_addr: identity.mac_address.clone(),
        ip_addr: identity.ip_address.to_string(),
        status: job.status.wire_name(state.persona).to_string(),
        cumulative_print_time: state.stats.print_time_minutes,
        cumulative_filament: state.stats.filament_meters,
        right_temp: thermal.hotend.current,
        right_target_temp: thermal.hotend.target,
        plat_temp: thermal.bed.current,
        plat_target_temp: thermal.bed.target,
        chamber_temp: thermal.chamber.current,
        chamber_target_temp: thermal.chamber.target,
        cooling_fan_speed: hardware.cooling_fan_speed,
        chamber_fan_speed: hardware.chamber_fan_speed,
        light_status: switch(hardware.led_on),
        door_status: "close".to_string(),
        auto_shutdown: "close".to_string(),
        auto_shutdown_time: 0,
        print_file_name: job.file.clone().unwrap_or_default(),
        print_progress: job.progress,
        print_layer: job.layer,
        target_print_layer: job.total_layers,
        print_duration: job.duration,
        estimated_time: job.remaining,
        right_filament_type: right_filament,
        has_right_filament: true,
        left_filament_type: String::new(),
        has_left_filament: false,
        error_code: String::new(),
        measure: "metric".to_string(),
        nozzle_cnt: identity.tool_count,
        nozzle_model: "0.4mm".to_string(),
        current_print_speed: 100,
        print_speed_adjust: hardware.print_speed_adjust,
        z_axis_compensation: hardware.z_axis_compensation,
        tvoc: 0,
        remaining_disk_space: 1024,
        estimated_right_len: job.estimated_length,
        estimated_right_weight: job.estimated_weight,
        estimated_left_len: 0.0,
        estimated_left_weight: 0.0,
        flash_register_code: String::new(),
        polar_register_code: String::new(),
        has_matl_station: station.is_some(),
        external_fan_status: features.filtration.then(|| switch(hardware.external_fan_on)),
        internal_fan_status: features.filtration.then(|| switch(hardware.internal_fan_on)),
        camera_stream_url: features
            .camera
            .then(|| format!("http://{}:8080/stream", identity.ip_address)),
        left_temp: features.camera.then_some(0.0),
        left_target_temp: features.camera.then_some(0.0),
        cooling_fan_left_speed: features.camera.then_some(0),
        matl_station_info: station.map(|s| s.status()),
        indep_matl_info: station.and_then(|s| s.current_material()),
    }
}

/// `/control`: run one control command. Nothing changes on failure.
pub fn control(state: &mut PrinterState, command: ControlCommand) -> Envelope {
    match apply_control(state, command) {
        Ok(()) => Envelope::success(),
        Err(err) => Envelope::rejected(err.to_string()),
    }
}

fn apply_control(state: &mut PrinterState, command: ControlCommand) -> Result<(), StateError> {
    match command {
        ControlCommand::Light(args) => state.hardware.led_on = args.status.is_open(),
        ControlCommand::Printer(args) => {
            let hardware = &mut state.hardware;
            if let Some(speed) = args.speed {
                hardware.print_speed_adjust = speed;
            }
            if let Some(offset) = args.z_axis_compensation {
                hardware.z_axis_compensation = offset;
            }
            if let Some(speed) = args.chamber_fan {
                hardware.chamber_fan_speed = speed;
            }
            if let Some(speed) = args.cooling_fan {
                hardware.cooling_fan_speed = speed;
            }
        }
        ControlCommand::Job(args) => match args.action {
            JobAction::Pause => state.pause()?,
            JobAction::Resume => state.resume()?,
            JobAction::Cancel => state.cancel()?,
        },
        ControlCommand::Circulation(args) => {
            state.hardware.internal_fan_on = args.internal.is_open();
            state.hardware.external_fan_on = args.external.is_open();
        }
        ControlCommand::Stream(args) => state.hardware.camera_on = args.action.is_open(),
        ControlCommand::Temperature(args) => {
            let targets = [
                (HeaterKind::Hotend, args.extruder_temp),
                (HeaterKind::Bed, args.bed_temp),
                (HeaterKind::Chamber, args.chamber_temp),
            ];
            // Check every target before touching any heater.
            for (heater, value) in targets {
                if let Some(value) = value.filter(|v| !thermal::valid_target(*v)) {
                    return Err(StateError::TemperatureOutOfRange { heater, value });
                }
            }
            for (heater, value) in targets {
                if let Some(value) = value {
                    state.set_target(heater, value)?;
                }
            }
        }
    }
    Ok(())
}

/// `/gcodeList`: the recent files. The AD5X firmware sends the detailed
/// form, everything else a bare name list.
pub fn gcode_list(state: &PrinterState) -> Envelope {
    let recent = state.files().recent();
    if state.mode() == PrinterMode::Ad5x {
        let detail: Vec<_> = recent.iter().map(|f| f.metadata.list_entry(&f.name)).collect();
        Envelope::success()
            .with("gcodeList", Vec::<String>::new())
            .with("gcodeListDetail", detail)
    } else {
        let names: Vec<&str> = recent.iter().map(|f| f.name.as_str()).collect();
        Envelope::success().with("gcodeList", names)
    }
}

/// `/gcodeThumb`: a file's thumbnail as base64 PNG.
pub fn gcode_thumb(state: &PrinterState, request: &FileRequest) -> Envelope {
    let Some(file) = request.file_name.as_deref().filter(|f| !f.is_empty()) else {
        return Envelope::rejected("Filename required");
    };
    if !state.files().contains(file) {
        return Envelope::rejected(StateError::FileNotFound(file.to_string()).to_string());
    }

    match state.thumbnail_for(file) {
        Some(png) => Envelope::success().with("imageData", STANDARD.encode(png)),
        None => Envelope::rejected("Thumbnail not found"),
    }
}

/// Mappings only matter when the job asks for the material station.
fn job_mappings(
    state: &PrinterState,
    use_matl_station: bool,
    raw: &serde_json::Value,
) -> Result<Vec<MaterialMapping>, StateError> {
    if !use_matl_station {
        return Ok(Vec::new());
    }
    if state.material_station().is_none() {
        return Err(StateError::NoMaterialStation);
    }
    Ok(parse_material_mappings(raw)?)
}

/// `/printGcode`: start printing a stored file.
pub fn print_gcode(state: &mut PrinterState, request: &PrintRequest) -> Envelope {
    let Some(file) = request.file_name.as_deref().filter(|f| state.files().contains(f)) else {
        return Envelope::rejected("File not found");
    };

    let result = job_mappings(state, request.use_matl_station, &request.material_mappings).and_then(|mappings| {
        state.start_print_with(
            file,
            PrintOptions {
                leveling_before_print: request.leveling_before_print,
                material_mappings: mappings,
            },
        )
    });

    match result {
        Ok(()) => Envelope::success(),
        Err(err) => Envelope::rejected(err.to_string()),
    }
}

/// The header block of an `/uploadGcode` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadHeaders {
    /// Credentials.
    pub credentials: Credentials,
    /// Start printing once stored.
    pub print_now: bool,
    /// Level the bed first.
    pub leveling_before_print: bool,
    /// Feed from the material station.
    pub use_matl_station: bool,
    /// Number of tools the file uses.
    pub tool_count: Option<u32>,
    /// Slicer estimate, seconds.
    pub printing_time: Option<u64>,
    /// Layer count.
    pub total_layers: Option<u32>,
    /// Declared size.
    pub file_size: Option<u64>,
    /// Base64 encoded JSON list of mappings.
    pub material_mappings: Option<String>,
}

impl UploadHeaders {
    /// Read the upload headers. Missing or unparseable values fall back to
    /// their defaults.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let flag = |name: &str| text(name).is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        UploadHeaders {
            credentials: Credentials {
                serial_number: text("serialnumber").unwrap_or_default().to_string(),
                check_code: text("checkcode").unwrap_or_default().to_string(),
            },
            print_now: flag("printnow"),
            leveling_before_print: flag("levelingbeforeprint"),
            use_matl_station: flag("usematlstation"),
            tool_count: text("gcodetoolcnt").and_then(|v| v.parse().ok()),
            printing_time: text("printingtime").and_then(|v| v.parse().ok()),
            total_layers: text("totallayers").and_then(|v| v.parse().ok()),
            file_size: text("filesize").and_then(|v| v.parse().ok()),
            material_mappings: text("materialmappings").filter(|v| !v.is_empty()).map(str::to_string),
        }
    }

    /// Decode the base64 `materialMappings` header into raw JSON.
    fn raw_mappings(&self) -> Result<serde_json::Value, String> {
        let Some(encoded) = &self.material_mappings else {
            return Ok(serde_json::Value::Null);
        };
        let json = STANDARD
            .decode(encoded)
            .map_err(|err| format!("Invalid materialMappings encoding: {err}"))?;
        serde_json::from_slice(&json).map_err(|err| format!("Invalid materialMappings JSON: {err}"))
    }
}

/// `/uploadGcode`: store a file, and start it when asked to. The upload
/// succeeds once the file is stored; a print that cannot start is only
/// logged.
pub fn upload(state: &mut PrinterState, headers: &UploadHeaders, file_name: &str, data: Bytes) -> Envelope {
    let file_name = file_name.trim();
    let raw = match headers.raw_mappings() {
        Ok(raw) => raw,
        Err(message) => return Envelope::rejected(message),
    };
    let mappings = match job_mappings(state, headers.use_matl_station, &raw) {
        Ok(mappings) => mappings,
        Err(err) => return Envelope::rejected(err.to_string()),
    };

    let defaults = FileMetadata::default();
    let tool_datas: Vec<ToolData> = mappings.iter().map(ToolData::from_mapping).collect();
    let metadata = FileMetadata {
        printing_time: headers.printing_time.unwrap_or(defaults.printing_time),
        file_size: headers.file_size.unwrap_or(data.len() as u64),
        total_filament_weight: if tool_datas.is_empty() {
            defaults.total_filament_weight
        } else {
            tool_datas.iter().map(|t| t.filament_weight).sum()
        },
        total_layers: headers.total_layers.filter(|l| *l > 0).unwrap_or(defaults.total_layers),
        use_matl_station: headers.use_matl_station,
        tool_count: headers
            .tool_count
            .unwrap_or_else(|| u32::try_from(tool_datas.len()).unwrap_or(1).max(1)),
        tool_datas,
    };

    tracing::info!(file = file_name, bytes = data.len(), print_now = headers.print_now, "storing upload");
    if let Err(err) = state.files_mut().upload(file_name, data, metadata) {
        return Envelope::rejected(err.to_string());
    }

    if headers.print_now {
        let options = PrintOptions {
            leveling_before_print: headers.leveling_before_print,
            material_mappings: mappings,
        };
        if let Err(err) = state.start_print_with(file_name, options) {
            tracing::warn!(file = file_name, error = %err, "stored upload but did not start it");
        }
    }
    Envelope::success()
}
