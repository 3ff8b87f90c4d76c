//! Printer models and the features each one exposes.

use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The printer model being emulated.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, FromStr,
)]
pub enum PrinterMode {
    /// Adventurer 5M.
    #[serde(rename = "5M")]
    #[display("5M")]
    FiveM,
    /// Adventurer 5M Pro: adds a camera and air filtration.
    #[serde(rename = "5M_Pro")]
    #[display("5M_Pro")]
    FiveMPro,
    /// Adventurer 5X: camera, filtration and a four slot material station.
    #[default]
    #[serde(rename = "AD5X")]
    #[display("AD5X")]
    Ad5x,
}

/// The optional hardware a [`PrinterMode`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFeatures {
    /// A chamber camera with an MJPEG stream.
    pub camera: bool,
    /// Internal/external circulation fans.
    pub filtration: bool,
    /// The multi-colour material station.
    pub material_station: bool,
}

impl PrinterMode {
    /// Every supported mode.
    pub const ALL: [PrinterMode; 3] = [PrinterMode::FiveM, PrinterMode::FiveMPro, PrinterMode::Ad5x];

    /// The hardware this mode exposes.
    pub fn features(self) -> ModeFeatures {
        match self {
            PrinterMode::FiveM => ModeFeatures {
                camera: false,
                filtration: false,
                material_station: false,
            },
            PrinterMode::FiveMPro => ModeFeatures {
                camera: true,
                filtration: true,
                material_station: false,
            },
            PrinterMode::Ad5x => ModeFeatures {
                camera: true,
                filtration: true,
                material_station: true,
            },
        }
    }

    /// The model suffix appended to the configured base name.
    pub fn model_suffix(self) -> &'static str {
        match self {
            PrinterMode::FiveM => "5M",
            PrinterMode::FiveMPro => "5M Pro",
            PrinterMode::Ad5x => "5X",
        }
    }

    /// The printer name reported for this mode, e.g. `Adventurer 5M Pro`.
    pub fn printer_name(self, base: &str) -> String {
        format!("{} {}", base.trim_end(), self.model_suffix())
    }

    /// The machine type reported by `~M115`.
    pub fn machine_type(self) -> String {
        self.printer_name("Adventurer")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(PrinterMode::FiveMPro.printer_name("FlashForge Adventurer"), "FlashForge Adventurer 5M Pro");
        assert_eq!(PrinterMode::Ad5x.machine_type(), "Adventurer 5X");
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&PrinterMode::FiveMPro).unwrap(), r#""5M_Pro""#);
        let mode: PrinterMode = serde_json::from_str(r#""AD5X""#).unwrap();
        assert_eq!(mode, PrinterMode::Ad5x);
        assert_eq!("5M".parse::<PrinterMode>().unwrap(), PrinterMode::FiveM);
    }

    #[test]
    fn test_only_ad5x_has_station() {
        for mode in PrinterMode::ALL {
            assert_eq!(mode.features().material_station, mode == PrinterMode::Ad5x);
        }
    }
}
