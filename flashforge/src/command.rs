//! The `~`-prefixed command lines accepted on the TCP control port.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref AXIS_REGEX: regex::Regex =
        regex::Regex::new(r"([XYZxyz])([-+]?[0-9]*\.?[0-9]+)").expect("axis regex is valid");
}

/// A single command line, parsed once at the edge of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Command {
    /// `~M601 S1`: take control of the printer.
    Login,
    /// `~M602`: release control.
    Logout,
    /// `~M115`: identity block.
    Info,
    /// `~M105`: temperatures.
    Temperature,
    /// `~M119`: endstops and machine status.
    Endstop,
    /// `~M27`: job progress.
    PrintStatus,
    /// `~M114`: head position.
    Position,
    /// `~M146 r.. g.. b..`: chamber light.
    Led {
        /// `Some(true)` for full white, `Some(false)` for black, `None` for
        /// anything else.
        on: Option<bool>,
    },
    /// `~M405`: enable the filament runout sensor.
    FilamentSensorOn,
    /// `~M406`: disable the filament runout sensor.
    FilamentSensorOff,
    /// `~G28`: home all axes.
    Home,
    /// `~M24`: resume.
    Resume,
    /// `~M25`: pause.
    Pause,
    /// `~M26`: stop.
    Stop,
    /// `~M104 S<t>`: set the hotend target.
    SetHotend {
        /// The requested target, if it parsed.
        target: Option<f64>,
    },
    /// `~M140 S<t>`: set the bed target.
    SetBed {
        /// The requested target, if it parsed.
        target: Option<f64>,
    },
    /// `~M109 S<t>`: set the hotend target and wait for it.
    WaitHotend {
        /// The requested target, if it parsed.
        target: Option<f64>,
    },
    /// `~M190 S<t>`: set the bed target and wait for it.
    WaitBed {
        /// The requested target, if it parsed.
        target: Option<f64>,
    },
    /// `~M661`: list stored files.
    ListFiles,
    /// `~M662 <path>`: fetch a thumbnail.
    Thumbnail {
        /// The requested path with any `/data/` prefix removed.
        file: String,
    },
    /// `~G1 X.. Y.. Z..`: move the head.
    Move {
        /// New X coordinate.
        x: Option<f64>,
        /// New Y coordinate.
        y: Option<f64>,
        /// New Z coordinate.
        z: Option<f64>,
    },
    /// Anything else. Echoed back as received.
    Other {
        /// The line without its leading `~`.
        line: String,
    },
}

/// Parse the `S<value>` argument of a temperature command.
fn parse_s_argument<'a>(mut args: impl Iterator<Item = &'a str>) -> Option<f64> {
    let value = args.next()?.strip_prefix(['S', 's'])?;
    value.parse().ok().filter(|v: &f64| v.is_finite())
}

impl Command {
    /// Parse one line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let body = line.strip_prefix('~').unwrap_or(line).trim_start();
        let mut tokens = body.split_whitespace();
        let code = tokens.next()?.to_ascii_uppercase();

        let command = match code.as_str() {
            "M601" if tokens.next().is_some_and(|t| t.eq_ignore_ascii_case("S1")) => Command::Login,
            "M602" => Command::Logout,
            "M115" => Command::Info,
            "M105" => Command::Temperature,
            "M119" => Command::Endstop,
            "M27" => Command::PrintStatus,
            "M114" => Command::Position,
            "M146" => Command::Led {
                on: parse_led(tokens),
            },
            "M405" => Command::FilamentSensorOn,
            "M406" => Command::FilamentSensorOff,
            "G28" => Command::Home,
            "M24" => Command::Resume,
            "M25" => Command::Pause,
            "M26" => Command::Stop,
            "M104" => Command::SetHotend {
                target: parse_s_argument(tokens),
            },
            "M140" => Command::SetBed {
                target: parse_s_argument(tokens),
            },
            "M109" => Command::WaitHotend {
                target: parse_s_argument(tokens),
            },
            "M190" => Command::WaitBed {
                target: parse_s_argument(tokens),
            },
            "M661" => Command::ListFiles,
            "M662" => {
                let path = tokens.collect::<Vec<_>>().join(" ");
                let file = path.strip_prefix("/data/").unwrap_or(&path).to_string();
                Command::Thumbnail { file }
            }
            "G1" => {
                let rest = body[code.len()..].to_string();
                let mut movement = (None, None, None);
                for caps in AXIS_REGEX.captures_iter(&rest) {
                    let Ok(value) = caps[2].parse::<f64>() else {
                        continue;
                    };
                    match caps[1].to_ascii_uppercase().as_str() {
                        "X" => movement.0 = Some(value),
                        "Y" => movement.1 = Some(value),
                        "Z" => movement.2 = Some(value),
                        _ => {}
                    }
                }
                Command::Move {
                    x: movement.0,
                    y: movement.1,
                    z: movement.2,
                }
            }
            _ => Command::Other { line: body.to_string() },
        };

        Some(command)
    }

    /// The name used in the `CMD <name> Received.` header.
    pub fn header_name(&self) -> &str {
        match self {
            Command::Login => "M601",
            Command::Logout => "M602",
            Command::Info => "M115",
            Command::Temperature => "M105",
            Command::Endstop => "M119",
            Command::PrintStatus => "M27",
            Command::Position => "M114",
            Command::Led { .. } => "M146",
            Command::FilamentSensorOn => "M405",
            Command::FilamentSensorOff => "M406",
            Command::Home => "G28",
            Command::Resume => "M24",
            Command::Pause => "M25",
            Command::Stop => "M26",
            Command::SetHotend { .. } => "M104",
            Command::SetBed { .. } => "M140",
            Command::WaitHotend { .. } => "M109",
            Command::WaitBed { .. } => "M190",
            Command::ListFiles => "M661",
            Command::Thumbnail { .. } => "M662",
            Command::Move { .. } => "G1",
            Command::Other { line } => line,
        }
    }
}

fn parse_led<'a>(tokens: impl Iterator<Item = &'a str>) -> Option<bool> {
    let mut channels = Vec::with_capacity(3);
    for token in tokens {
        let mut chars = token.chars();
        let Some(channel) = chars.next() else {
            continue;
        };
        if !matches!(channel.to_ascii_lowercase(), 'r' | 'g' | 'b') {
            continue;
        }
        channels.push(chars.as_str().parse::<u16>().ok()?);
    }

    match channels.as_slice() {
        [255, 255, 255] => Some(true),
        [0, 0, 0] => Some(false),
        _ => None,
    }
}

impl FromStr for Command {
    type Err = EmptyCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s).ok_or(EmptyCommand)
    }
}

/// The line held no command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("empty command line")]
pub struct EmptyCommand;
