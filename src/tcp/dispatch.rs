//! Executes parsed commands against the printer and renders the replies.

use flashforge::{command::Command, status::FileListFraming};

use crate::state::{progress, thermal::HeaterKind, PrinterState};

/// Marker bytes that open a binary `~M661` listing.
const BINARY_LIST_PREFIX: &[u8] = b"D\xCC\xD1D\xCC";
/// Marker bytes before each path of a binary `~M661` listing.
const BINARY_ENTRY_MARKER: &[u8] = b"::\xCC\xD1";

fn ack(name: &str) -> String {
    format!("CMD {name} Received.\nok\n")
}

/// Run one command and produce the bytes to send back.
///
/// Every failure is reported in-band; the connection never sees an error.
pub fn execute(state: &mut PrinterState, command: &Command) -> Vec<u8> {
    let name = command.header_name();
    let reply = match command {
        Command::Login => "CMD M601 Received.\nControl Success v2.1.\nok\n".to_string(),
        Command::Logout => "CMD M602 Received.\nControl Release.\nok\n".to_string(),
        Command::Info => info(state),
        Command::Temperature => temperature(state),
        Command::Endstop => endstop(state),
        Command::PrintStatus => print_status(state),
        Command::Position => {
            let p = state.position();
            format!("CMD M114 Received.\nX:{:?} Y:{:?} Z:{:?} A:0 B:0\nok\n", p.x, p.y, p.z)
        }
        Command::Led { on } => {
            if let Some(on) = on {
                state.hardware.led_on = *on;
            }
            ack(name)
        }
        Command::FilamentSensorOn | Command::FilamentSensorOff => {
            state.hardware.filament_sensor = matches!(command, Command::FilamentSensorOn);
            ack(name)
        }
        Command::Home => {
            state.home();
            ack(name)
        }
        Command::Resume => {
            if let Err(err) = state.resume() {
                tracing::debug!(error = %err, "ignoring M24");
            }
            ack(name)
        }
        Command::Pause => {
            if let Err(err) = state.pause() {
                tracing::debug!(error = %err, "ignoring M25");
            }
            ack(name)
        }
        Command::Stop => {
            if state.cancel().is_err() && state.reset().is_err() {
                tracing::debug!(status = %state.status(), "nothing to stop");
            }
            ack(name)
        }
        Command::SetHotend { target } => set_target(state, HeaterKind::Hotend, *target, false, name),
        Command::SetBed { target } => set_target(state, HeaterKind::Bed, *target, false, name),
        Command::WaitHotend { target } => set_target(state, HeaterKind::Hotend, *target, true, name),
        Command::WaitBed { target } => set_target(state, HeaterKind::Bed, *target, true, name),
        Command::ListFiles => return list_files(state),
        Command::Thumbnail { file } => return thumbnail(state, file),
        Command::Move { x, y, z } => {
            state.move_to(*x, *y, *z);
            ack(name)
        }
        Command::Other { line } => {
            tracing::debug!(command = %line, "unhandled command");
            ack(line)
        }
    };
    reply.into_bytes()
}

fn info(state: &PrinterState) -> String {
    let id = &state.identity;
    format!(
        "CMD M115 Received.\n\
         Machine Type: {}\n\
         Machine Name: {}\n\
         Firmware: {}\n\
         SN: {}\n\
         X: {} Y: {} Z: {}\n\
         Tool Count: {}\n\
         ok\n",
        id.machine_type,
        id.name,
        id.firmware_version,
        id.serial_number,
        id.build_volume.x,
        id.build_volume.y,
        id.build_volume.z,
        id.tool_count,
    )
}

fn temperature(state: &PrinterState) -> String {
    let thermal = state.thermal();
    format!(
        "CMD M105 Received.\nT0:{:.1}/{:.1} T1:0.0/0.0 B:{:.1}/{:.1}\nok\n",
        thermal.hotend.current, thermal.hotend.target, thermal.bed.current, thermal.bed.target
    )
}

fn endstop(state: &PrinterState) -> String {
    let status = state.status();
    let (machine_status, move_mode) = status.machine_status();
    let file = match &state.job().file {
        Some(file) if status.reports_file() => file.as_str(),
        _ => "",
    };
    format!(
        "CMD M119 Received.\n\
         Endstop: X-min: 0 Y-min: 0 Z-min: 0\n\
         MachineStatus: {machine_status}\n\
         MoveMode: {move_mode}\n\
         Status: S:0 L:0 J:0 F:0\n\
         LED: {}\n\
         CurrentFile: {file}\n\
         ok\n",
        u8::from(state.hardware.led_on),
    )
}

fn print_status(state: &PrinterState) -> String {
    let job = state.job();
    // Byte counter and layer share one rounding so they never disagree.
    let done = progress::m27_layer(job.progress);
    format!(
        "CMD M27 Received.\n\
         SD printing byte {}/100\n\
         Layer: {}/100\n\
         Status: S:{} L:0 J:0 F:0\n\
         ok\n",
        done,
        done,
        job.status.status_code(),
    )
}

fn set_target(state: &mut PrinterState, kind: HeaterKind, target: Option<f64>, wait: bool, name: &str) -> String {
    let Some(target) = target else {
        tracing::debug!(command = name, "missing or malformed S argument");
        return ack(name);
    };

    let result = if wait {
        state.set_target_and_wait(kind, target)
    } else {
        state.set_target(kind, target)
    };
    if let Err(err) = result {
        tracing::warn!(command = name, error = %err, "rejected temperature");
    }
    ack(name)
}

fn list_files(state: &PrinterState) -> Vec<u8> {
    let names = state.files().names();
    match state.file_list_framing {
        FileListFraming::Text => {
            let paths: Vec<String> = names.iter().map(|n| format!("/data/{n}")).collect();
            format!("CMD M661 Received.\nD{{::{}::\nok\n", paths.join("\n")).into_bytes()
        }
        FileListFraming::Binary => {
            let mut reply = b"CMD M661 Received.\nok\n".to_vec();
            reply.extend_from_slice(BINARY_LIST_PREFIX);
            for name in names {
                reply.extend_from_slice(BINARY_ENTRY_MARKER);
                reply.extend_from_slice(format!("/data/{name}::").as_bytes());
            }
            reply
        }
    }
}

fn thumbnail(state: &PrinterState, file: &str) -> Vec<u8> {
    if !file.is_empty() && !state.files().contains(file) {
        tracing::warn!(file = file, "thumbnail requested for unknown file, sending default");
    }

    match state.thumbnail_for(file) {
        Some(png) => {
            let mut reply = b"CMD M662 Received.\nok\n".to_vec();
            reply.extend_from_slice(png);
            reply
        }
        None => b"CMD M662 Received.\nError: no thumbnail available\nok\n".to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use flashforge::{mode::PrinterMode, status::Persona};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::state::tests::state;

    fn run(state: &mut PrinterState, line: &str) -> String {
        let command = Command::parse(line).unwrap();
        String::from_utf8_lossy(&execute(state, &command)).into_owned()
    }

    #[test]
    fn test_login_logout() {
        let mut state = state(PrinterMode::FiveM);
        assert_eq!(run(&mut state, "~M601 S1"), "CMD M601 Received.\nControl Success v2.1.\nok\n");
        assert_eq!(run(&mut state, "~M602"), "CMD M602 Received.\nControl Release.\nok\n");
    }

    #[test]
    fn test_info() {
        let mut state = state(PrinterMode::Ad5x);
        assert_eq!(
            run(&mut state, "~M115"),
            "CMD M115 Received.\nMachine Type: Adventurer 5X\nMachine Name: FlashForge Adventurer 5X\n\
             Firmware: 1.2.3\nSN: SNMOMC9900728\nX: 220 Y: 220 Z: 220\nTool Count: 1\nok\n"
        );
    }

    #[test]
    fn test_temperature_approaches_target() {
        let mut state = state(PrinterMode::FiveM);
        run(&mut state, "~M104 S200");

        let mut last = state.thermal().hotend.current;
        for _ in 0..60 {
            state.tick();
            let reply = run(&mut state, "~M105");
            let t0 = reply
                .split_whitespace()
                .find_map(|w| w.strip_prefix("T0:"))
                .and_then(|w| w.split('/').next())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap();
            if last < 195.0 {
                assert!(t0 > last, "{t0} should rise past {last}");
            }
            assert!(t0 - last <= 5.0 + 0.3 + 0.1);
            assert!(t0 <= 200.0 + 0.5 + 0.3 + 0.1);
            last = t0;
        }
        assert!(last >= 199.0);
    }

    #[test]
    fn test_malformed_target_ignored() {
        let mut state = state(PrinterMode::FiveM);
        assert_eq!(run(&mut state, "~M140 Sbad"), "CMD M140 Received.\nok\n");
        assert_eq!(run(&mut state, "~M140 S999"), "CMD M140 Received.\nok\n");
        assert_eq!(state.thermal().bed.target, 0.0);
    }

    #[test]
    fn test_wait_snaps_temperature() {
        let mut state = state(PrinterMode::FiveM);
        run(&mut state, "~M190 S60");
        assert_eq!(state.thermal().bed.current, 60.0);
        assert!(run(&mut state, "~M105").contains("B:60.0/60.0"));
    }

    #[test]
    fn test_endstop_reports_file_while_printing() {
        let mut state = state(PrinterMode::FiveM);
        let idle = run(&mut state, "~M119");
        assert!(idle.contains("MachineStatus: READY\nMoveMode: READY\n"));
        assert!(idle.contains("LED: 0\nCurrentFile: \nok\n"));

        state.start_print("test.3mf").unwrap();
        run(&mut state, "~M146 r255 g255 b255 F0");
        let printing = run(&mut state, "~M119");
        assert!(printing.contains("MachineStatus: BUILDING_FROM_SD\nMoveMode: MOVING\n"));
        assert!(printing.contains("LED: 1\nCurrentFile: test.3mf\n"));

        run(&mut state, "~M25");
        assert!(run(&mut state, "~M119").contains("MachineStatus: PAUSED\nMoveMode: PAUSED\n"));
    }

    #[test]
    fn test_print_status() {
        let mut state = state(PrinterMode::FiveM);
        state.persona = Persona::Legacy;
        assert_eq!(
            run(&mut state, "~M27"),
            "CMD M27 Received.\nSD printing byte 0/100\nLayer: 0/100\nStatus: S:0 L:0 J:0 F:0\nok\n"
        );

        state.start_print("test.3mf").unwrap();
        for _ in 0..42 {
            state.tick_progress();
        }
        assert_eq!(
            run(&mut state, "~M27"),
            "CMD M27 Received.\nSD printing byte 42/100\nLayer: 42/100\nStatus: S:1 L:0 J:0 F:0\nok\n"
        );

        run(&mut state, "~M26");
        assert!(run(&mut state, "~M27").contains("byte 0/100"));
    }

    #[test]
    fn test_print_status_small_progress() {
        let mut state = state(PrinterMode::FiveM);
        state.persona = Persona::FiveM;
        state.start_print("test.3mf").unwrap();
        state.tick_progress();
        assert!(state.job().progress > 0.0 && state.job().progress < 1.0);

        let reply = run(&mut state, "~M27");
        assert!(reply.contains("SD printing byte 1/100\nLayer: 1/100\n"), "{reply}");
    }

    #[test]
    fn test_position() {
        let mut state = state(PrinterMode::FiveM);
        run(&mut state, "~G1 X10.5 Y20 Z0.2 F3000");
        assert_eq!(run(&mut state, "~M114"), "CMD M114 Received.\nX:10.5 Y:20.0 Z:0.2 A:0 B:0\nok\n");
        run(&mut state, "~G28");
        assert_eq!(run(&mut state, "~M114"), "CMD M114 Received.\nX:0.0 Y:0.0 Z:0.0 A:0 B:0\nok\n");
    }

    #[test]
    fn test_text_listing() {
        let mut state = state(PrinterMode::FiveM);
        state.file_list_framing = FileListFraming::Text;
        assert_eq!(
            run(&mut state, "~M661"),
            "CMD M661 Received.\nD{::/data/test.3mf\n/data/test2.gcode\n/data/test3.gcode.gx::\nok\n"
        );
    }

    #[test]
    fn test_binary_listing() {
        let mut state = state(PrinterMode::FiveM);
        state.file_list_framing = FileListFraming::Binary;
        *state.files_mut() = crate::state::files::FileRegistry::with_names(["a.gcode"]);

        let reply = execute(&mut state, &Command::ListFiles);
        let mut expected = b"CMD M661 Received.\nok\nD\xCC\xD1D\xCC".to_vec();
        expected.extend_from_slice(b"::\xCC\xD1/data/a.gcode::");
        assert_eq!(reply, expected);
    }

    #[test]
    fn test_thumbnail() {
        let mut state = state(PrinterMode::FiveM);
        assert_eq!(
            run(&mut state, "~M662 /data/test.3mf"),
            "CMD M662 Received.\nError: no thumbnail available\nok\n"
        );

        state.set_default_thumbnail(Some(b"\x89PNG".to_vec()));
        let reply = execute(
            &mut state,
            &Command::Thumbnail {
                file: "missing.3mf".to_string(),
            },
        );
        assert_eq!(reply, b"CMD M662 Received.\nok\n\x89PNG".to_vec());
    }

    #[test]
    fn test_unknown_command_echo() {
        let mut state = state(PrinterMode::FiveM);
        assert_eq!(run(&mut state, "~M650"), "CMD M650 Received.\nok\n");
    }

    #[test]
    fn test_filament_sensor() {
        let mut state = state(PrinterMode::FiveM);
        run(&mut state, "~M406");
        assert!(!state.hardware.filament_sensor);
        run(&mut state, "~M405");
        assert!(state.hardware.filament_sensor);
    }
}
