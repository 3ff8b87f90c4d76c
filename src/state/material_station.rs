//! The AD5X four-slot material station.

use flashforge::{
    http::{IndepMatlInfo, MatlStationInfo},
    material::SlotInfo,
};

use super::StateError;

/// Number of slots on the station.
pub const SLOT_COUNT: u8 = 4;

/// New contents for a slot. `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotUpdate {
    /// Whether a spool is loaded.
    pub has_filament: Option<bool>,
    /// Material name.
    pub material_name: Option<String>,
    /// Material colour, `#RRGGBB`.
    pub material_color: Option<String>,
}

/// Slot contents plus which slot is feeding and which is loading.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialStation {
    slots: Vec<SlotInfo>,
    current_slot: u8,
    loading_slot: u8,
    state_action: u8,
    state_step: u8,
}

/// The spools a new station ships with.
pub fn default_slots() -> Vec<SlotInfo> {
    let slot = |slot_id: u8, has_filament: bool, name: &str, color: &str| SlotInfo {
        slot_id,
        has_filament,
        material_name: name.to_string(),
        material_color: color.to_string(),
    };

    vec![
        slot(1, true, "PLA", "#FFFFFF"),
        slot(2, true, "PLA", "#000000"),
        slot(3, true, "PETG", "#FF0000"),
        slot(4, false, "", "#000000"),
    ]
}

impl Default for MaterialStation {
    fn default() -> Self {
        MaterialStation::new(default_slots())
    }
}

impl MaterialStation {
    /// A station with the given slots. Feeding from slot 1, nothing
    /// loading.
    pub fn new(slots: Vec<SlotInfo>) -> Self {
        MaterialStation {
            slots,
            current_slot: 1,
            loading_slot: 0,
            state_action: 0,
            state_step: 0,
        }
    }

    /// Every slot.
    pub fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    /// Number of slots.
    pub fn slot_count(&self) -> u8 {
        self.slots.len().try_into().unwrap_or(u8::MAX)
    }

    /// Slot feeding the extruder.
    pub fn current_slot(&self) -> u8 {
        self.current_slot
    }

    /// The `matlStationInfo` block.
    pub fn status(&self) -> MatlStationInfo {
        MatlStationInfo {
            current_slot: self.current_slot,
            current_load_slot: self.loading_slot,
            slot_cnt: self.slot_count(),
            slot_infos: self.slots.clone(),
            state_action: self.state_action,
            state_step: self.state_step,
        }
    }

    /// The `indepMatlInfo` block: material in the feeding slot, if any.
    pub fn current_material(&self) -> Option<IndepMatlInfo> {
        let slot = self.slot(self.current_slot)?;
        slot.has_filament.then(|| IndepMatlInfo {
            material_color: slot.material_color.clone(),
            material_name: slot.material_name.clone(),
            state_action: self.state_action,
            state_step: self.state_step,
        })
    }

    /// Look up a slot by id.
    pub fn slot(&self, slot_id: u8) -> Option<&SlotInfo> {
        self.slots.iter().find(|s| s.slot_id == slot_id)
    }

    /// Change one slot.
    pub fn update_slot(&mut self, slot_id: u8, update: SlotUpdate) -> Result<(), StateError> {
        if let Some(color) = &update.material_color {
            if !flashforge::material::is_hex_color(color) {
                return Err(StateError::InvalidColor(color.clone()));
            }
        }

        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.slot_id == slot_id)
            .ok_or(StateError::UnknownSlot(slot_id))?;

        if let Some(has_filament) = update.has_filament {
            slot.has_filament = has_filament;
        }
        if let Some(name) = update.material_name {
            slot.material_name = name;
        }
        if let Some(color) = update.material_color {
            slot.material_color = color;
        }
        Ok(())
    }

    /// Select the feeding slot, 1 through the slot count.
    pub fn set_current_slot(&mut self, slot_id: u8) -> Result<(), StateError> {
        if !(1..=self.slot_count()).contains(&slot_id) {
            return Err(StateError::UnknownSlot(slot_id));
        }
        self.current_slot = slot_id;
        Ok(())
    }

    /// Select the loading slot, or `0` for none.
    pub fn set_loading_slot(&mut self, slot_id: u8) -> Result<(), StateError> {
        if slot_id > self.slot_count() {
            return Err(StateError::UnknownSlot(slot_id));
        }
        self.loading_slot = slot_id;
        Ok(())
    }

    /// Set the raw action/step codes.
    pub fn set_state(&mut self, action: u8, step: u8) {
        self.state_action = action;
        self.state_step = step;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_status() {
        let station = MaterialStation::default();
        let status = station.status();
        assert_eq!(status.current_slot, 1);
        assert_eq!(status.current_load_slot, 0);
        assert_eq!(status.slot_cnt, 4);
        assert_eq!(status.slot_infos.len(), 4);
    }

    #[test]
    fn test_slot_bounds() {
        let mut station = MaterialStation::default();
        assert!(station.set_current_slot(4).is_ok());
        assert!(matches!(station.set_current_slot(0), Err(StateError::UnknownSlot(0))));
        assert!(matches!(station.set_current_slot(5), Err(StateError::UnknownSlot(5))));
        assert_eq!(station.current_slot(), 4);

        assert!(station.set_loading_slot(0).is_ok());
        assert!(station.set_loading_slot(5).is_err());
    }

    #[test]
    fn test_update_slot() {
        let mut station = MaterialStation::default();
        station
            .update_slot(
                4,
                SlotUpdate {
                    has_filament: Some(true),
                    material_name: Some("TPU".to_string()),
                    material_color: Some("#00FF00".to_string()),
                },
            )
            .unwrap();
        assert_eq!(station.slot(4).unwrap().material_name, "TPU");

        let err = station.update_slot(
            2,
            SlotUpdate {
                material_color: Some("green".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StateError::InvalidColor(_))));
        assert_eq!(station.slot(2).unwrap().material_color, "#000000");

        assert!(station.update_slot(9, SlotUpdate::default()).is_err());
    }

    #[test]
    fn test_current_material_needs_filament() {
        let mut station = MaterialStation::default();
        assert_eq!(station.current_material().unwrap().material_name, "PLA");

        station.set_current_slot(4).unwrap();
        assert_eq!(station.current_material(), None);
    }
}
