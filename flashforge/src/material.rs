//! Multi-colour material mappings and material-station slots.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref HEX_COLOR: regex::Regex = regex::Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("color regex is valid");
}

/// The most mappings a job can carry (one per extruder tool).
pub const MAX_MAPPINGS: usize = 4;

const REQUIRED_FIELDS: [&str; 5] = ["toolId", "slotId", "materialName", "toolMaterialColor", "slotMaterialColor"];

/// Maps a tool in the sliced file to a slot in the material station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaterialMapping {
    /// Tool index in the sliced file, 0-3.
    pub tool_id: i64,
    /// Material-station slot, 1-4.
    pub slot_id: i64,
    /// Material name, e.g. `PLA`.
    pub material_name: String,
    /// Colour the file was sliced with, `#RRGGBB`.
    pub tool_material_color: String,
    /// Colour loaded in the slot, `#RRGGBB`.
    pub slot_material_color: String,
}

/// Why a list of material mappings was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The value was not a JSON array.
    #[error("Material mappings must be a list")]
    NotAList,
    /// Multi-colour jobs need at least one mapping.
    #[error("Material mappings cannot be empty for multi-color jobs")]
    Empty,
    /// More mappings than tools.
    #[error("Maximum 4 material mappings allowed")]
    TooMany,
    /// A mapping was not a JSON object.
    #[error("Mapping {0} must be an object")]
    NotAnObject(usize),
    /// A mapping lacks a field.
    #[error("Missing required field '{field}' in mapping {index}")]
    MissingField {
        /// The missing field.
        field: &'static str,
        /// Position in the list.
        index: usize,
    },
    /// A field has the wrong JSON type.
    #[error("Invalid value for '{field}' in mapping {index}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Position in the list.
        index: usize,
    },
    /// `toolId` out of range.
    #[error("toolId must be between 0-3, got {value} at index {index}")]
    ToolId {
        /// The rejected value.
        value: i64,
        /// Position in the list.
        index: usize,
    },
    /// `slotId` out of range.
    #[error("slotId must be between 1-4, got {value} at index {index}")]
    SlotId {
        /// The rejected value.
        value: i64,
        /// Position in the list.
        index: usize,
    },
    /// Two mappings feed the same tool.
    #[error("Duplicate toolId {value} at index {index}")]
    DuplicateToolId {
        /// The repeated tool id.
        value: i64,
        /// Position of the repeat in the list.
        index: usize,
    },
    /// `materialName` blank.
    #[error("materialName cannot be empty at index {0}")]
    EmptyMaterialName(usize),
    /// `toolMaterialColor` malformed.
    #[error("toolMaterialColor must be in #RRGGBB format, got {value} at index {index}")]
    ToolColor {
        /// The rejected value.
        value: String,
        /// Position in the list.
        index: usize,
    },
    /// `slotMaterialColor` malformed.
    #[error("slotMaterialColor must be in #RRGGBB format, got {value} at index {index}")]
    SlotColor {
        /// The rejected value.
        value: String,
        /// Position in the list.
        index: usize,
    },
}

/// Whether a string is a `#RRGGBB` colour.
pub fn is_hex_color(value: &str) -> bool {
    HEX_COLOR.is_match(value)
}

/// Parse and validate a raw JSON list of mappings.
///
/// Structural problems (missing fields, wrong types) are reported with the
/// index of the offending mapping before any range checks run.
pub fn parse_material_mappings(raw: &serde_json::Value) -> Result<Vec<MaterialMapping>, MappingError> {
    let list = raw.as_array().ok_or(MappingError::NotAList)?;
    if list.is_empty() {
        return Err(MappingError::Empty);
    }
    if list.len() > MAX_MAPPINGS {
        return Err(MappingError::TooMany);
    }

    let mut mappings = Vec::with_capacity(list.len());
    for (index, entry) in list.iter().enumerate() {
        let object = entry.as_object().ok_or(MappingError::NotAnObject(index))?;
        if let Some(field) = REQUIRED_FIELDS.into_iter().find(|f| !object.contains_key(*f)) {
            return Err(MappingError::MissingField { field, index });
        }

        let int = |field: &'static str| {
            object[field]
                .as_i64()
                .ok_or(MappingError::InvalidField { field, index })
        };
        let string = |field: &'static str| {
            object[field]
                .as_str()
                .map(str::to_string)
                .ok_or(MappingError::InvalidField { field, index })
        };

        mappings.push(MaterialMapping {
            tool_id: int("toolId")?,
            slot_id: int("slotId")?,
            material_name: string("materialName")?,
            tool_material_color: string("toolMaterialColor")?,
            slot_material_color: string("slotMaterialColor")?,
        });
    }

    validate_material_mappings(&mappings)?;
    Ok(mappings)
}

/// Validate typed mappings. Pure; the first violation wins.
pub fn validate_material_mappings(mappings: &[MaterialMapping]) -> Result<(), MappingError> {
    if mappings.is_empty() {
        return Err(MappingError::Empty);
    }
    if mappings.len() > MAX_MAPPINGS {
        return Err(MappingError::TooMany);
    }

    for (index, mapping) in mappings.iter().enumerate() {
        if !(0..=3).contains(&mapping.tool_id) {
            return Err(MappingError::ToolId {
                value: mapping.tool_id,
                index,
            });
        }
        if !(1..=4).contains(&mapping.slot_id) {
            return Err(MappingError::SlotId {
                value: mapping.slot_id,
                index,
            });
        }
        if mappings[..index].iter().any(|m| m.tool_id == mapping.tool_id) {
            return Err(MappingError::DuplicateToolId {
                value: mapping.tool_id,
                index,
            });
        }
        if mapping.material_name.trim().is_empty() {
            return Err(MappingError::EmptyMaterialName(index));
        }
        if !is_hex_color(&mapping.tool_material_color) {
            return Err(MappingError::ToolColor {
                value: mapping.tool_material_color.clone(),
                index,
            });
        }
        if !is_hex_color(&mapping.slot_material_color) {
            return Err(MappingError::SlotColor {
                value: mapping.slot_material_color.clone(),
                index,
            });
        }
    }

    Ok(())
}

/// Per-tool material usage attached to a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolData {
    /// Tool index.
    pub tool_id: i64,
    /// Material-station slot feeding this tool.
    pub slot_id: i64,
    /// Material name.
    pub material_name: String,
    /// Material colour, `#RRGGBB`.
    pub material_color: String,
    /// Estimated filament use in grams.
    pub filament_weight: f64,
}

impl ToolData {
    /// Filament weight assumed per tool when an upload carries mappings.
    pub const DEFAULT_WEIGHT: f64 = 22.5;

    /// Describe the tool a mapping feeds.
    pub fn from_mapping(mapping: &MaterialMapping) -> Self {
        ToolData {
            tool_id: mapping.tool_id,
            slot_id: mapping.slot_id,
            material_name: mapping.material_name.clone(),
            material_color: mapping.tool_material_color.clone(),
            filament_weight: Self::DEFAULT_WEIGHT,
        }
    }
}

/// One slot of the material station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlotInfo {
    /// Slot number, 1-4.
    pub slot_id: u8,
    /// Whether a spool is loaded.
    pub has_filament: bool,
    /// Material name, empty when unloaded.
    pub material_name: String,
    /// Material colour, `#RRGGBB`.
    pub material_color: String,
}
