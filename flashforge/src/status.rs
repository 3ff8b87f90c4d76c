//! Print status vocabulary and the protocol dialects that render it.

use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The state of the print job.
///
/// This is the superset of every state reported by the firmware revisions we
/// emulate. Which name goes on the wire is decided by the [`Persona`].
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, FromStr,
)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum PrintStatus {
    /// Nothing is happening.
    #[default]
    Ready,
    /// The printer is busy with a non-print task.
    Busy,
    /// Bed levelling or another calibration routine.
    Calibrating,
    /// Heating up before a print.
    Heating,
    /// A job is printing.
    Printing,
    /// A pause was requested and is being carried out.
    Pausing,
    /// A job is paused.
    Paused,
    /// The job was cancelled.
    Cancelled,
    /// The job finished.
    Completed,
    /// The printer is in an error state.
    Error,
    /// The state could not be determined.
    Unknown,
}

impl PrintStatus {
    /// The status name for the given persona.
    pub fn wire_name(self, persona: Persona) -> &'static str {
        match persona {
            Persona::Legacy => match self {
                PrintStatus::Ready | PrintStatus::Unknown => "idle",
                PrintStatus::Busy | PrintStatus::Calibrating | PrintStatus::Heating | PrintStatus::Printing => {
                    "printing"
                }
                PrintStatus::Pausing | PrintStatus::Paused => "paused",
                PrintStatus::Completed => "completed",
                PrintStatus::Cancelled | PrintStatus::Error => "failed",
            },
            Persona::FiveM => match self {
                PrintStatus::Ready => "ready",
                PrintStatus::Busy => "busy",
                PrintStatus::Calibrating => "calibrating",
                PrintStatus::Heating => "heating",
                PrintStatus::Printing => "printing",
                PrintStatus::Pausing => "pausing",
                PrintStatus::Paused => "paused",
                PrintStatus::Cancelled => "cancelled",
                PrintStatus::Completed => "completed",
                PrintStatus::Error => "error",
                PrintStatus::Unknown => "unknown",
            },
        }
    }

    /// Parse a status name from either persona's vocabulary.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "idle" => Some(PrintStatus::Ready),
            "failed" | "cancel" => Some(PrintStatus::Cancelled),
            other => other.parse().ok(),
        }
    }

    /// Whether a job is loaded and not yet finished.
    pub fn is_active(self) -> bool {
        matches!(self, PrintStatus::Printing | PrintStatus::Pausing | PrintStatus::Paused)
    }

    /// Whether the `~M119` reply should name the current file.
    pub fn reports_file(self) -> bool {
        self.is_active() || self == PrintStatus::Completed
    }

    /// The `MachineStatus` / `MoveMode` pair reported by `~M119`.
    pub fn machine_status(self) -> (MachineStatus, MoveMode) {
        match self {
            PrintStatus::Printing | PrintStatus::Heating => (MachineStatus::BuildingFromSd, MoveMode::Moving),
            PrintStatus::Pausing | PrintStatus::Paused => (MachineStatus::Paused, MoveMode::Paused),
            PrintStatus::Completed => (MachineStatus::BuildingCompleted, MoveMode::Ready),
            PrintStatus::Busy | PrintStatus::Calibrating => (MachineStatus::Busy, MoveMode::Moving),
            _ => (MachineStatus::Ready, MoveMode::Ready),
        }
    }

    /// The numeric `S:` code reported by `~M27`.
    pub fn status_code(self) -> u8 {
        match self {
            PrintStatus::Ready | PrintStatus::Unknown => 0,
            PrintStatus::Busy | PrintStatus::Calibrating | PrintStatus::Heating | PrintStatus::Printing => 1,
            PrintStatus::Pausing | PrintStatus::Paused => 2,
            PrintStatus::Completed => 3,
            PrintStatus::Cancelled | PrintStatus::Error => 4,
        }
    }
}

/// The `MachineStatus:` field of an `~M119` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "SNAKE_CASE")]
pub enum MachineStatus {
    /// Idle.
    Ready,
    /// Printing from local storage.
    BuildingFromSd,
    /// Finished printing.
    BuildingCompleted,
    /// Paused.
    Paused,
    /// Doing something other than printing.
    Busy,
}

/// The `MoveMode:` field of an `~M119` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "SNAKE_CASE")]
pub enum MoveMode {
    /// Not moving.
    Ready,
    /// Axes are moving.
    Moving,
    /// Motion is suspended.
    Paused,
}

/// A protocol behaviour set observed across firmware revisions.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, FromStr,
)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum Persona {
    /// Older firmware: five status words and whole-percent progress steps.
    Legacy,
    /// Adventurer 5M-era firmware: the full status vocabulary and fine
    /// grained, jittered progress.
    #[default]
    FiveM,
}

/// How the `~M661` file listing is framed.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, FromStr,
)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum FileListFraming {
    /// `D{::` followed by newline separated paths and a closing `::`.
    #[default]
    Text,
    /// The binary marker framing used by newer firmware.
    Binary,
}
