//! Heater simulation: bounded steps toward a target plus a little noise.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Highest target any heater accepts, in °C.
pub const MAX_TARGET: f64 = 300.0;

/// Within this distance of its goal a heater stops stepping and only
/// jitters.
const SETTLE_BAND: f64 = 0.5;

/// Per-tick rates and noise of one heater, in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterProfile {
    /// Largest rise per tick toward a target.
    pub heat_rate: f64,
    /// Largest fall per tick toward a target.
    pub cool_rate: f64,
    /// Largest rise per tick toward the idle temperature.
    pub idle_warm_rate: f64,
    /// Largest fall per tick toward the idle temperature.
    pub idle_cool_rate: f64,
    /// Noise amplitude while a target is set.
    pub active_jitter: f64,
    /// Noise amplitude while idling.
    pub idle_jitter: f64,
}

/// The extruder heats fast and cools slowly.
pub const HOTEND: HeaterProfile = HeaterProfile {
    heat_rate: 5.0,
    cool_rate: 2.0,
    idle_warm_rate: 0.5,
    idle_cool_rate: 1.0,
    active_jitter: 0.3,
    idle_jitter: 0.1,
};

/// The bed has far more thermal mass.
pub const BED: HeaterProfile = HeaterProfile {
    heat_rate: 2.0,
    cool_rate: 1.0,
    idle_warm_rate: 0.3,
    idle_cool_rate: 0.8,
    active_jitter: 0.1,
    idle_jitter: 0.05,
};

/// Which heater an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, parse_display::Display)]
#[display(style = "lowercase")]
pub enum HeaterKind {
    /// The extruder.
    Hotend,
    /// The build plate.
    Bed,
    /// The enclosure. Reported, never simulated.
    Chamber,
}

/// One heater. A target of `0` means "off".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heater {
    /// Current reading.
    pub current: f64,
    /// Requested temperature, `0` when off.
    pub target: f64,
    /// Ambient temperature the heater drifts to while off.
    pub idle: f64,
}

impl Heater {
    /// A heater sitting at its idle temperature.
    pub fn idle_at(idle: f64) -> Self {
        Heater {
            current: idle,
            target: 0.0,
            idle,
        }
    }

    /// Whether a target is set.
    pub fn is_active(&self) -> bool {
        self.target > 0.0
    }

    /// Advance one tick.
    pub fn step(&mut self, profile: &HeaterProfile, rng: &mut impl Rng) {
        let (goal, rise, fall, jitter) = if self.is_active() {
            (self.target, profile.heat_rate, profile.cool_rate, profile.active_jitter)
        } else {
            (self.idle, profile.idle_warm_rate, profile.idle_cool_rate, profile.idle_jitter)
        };

        let delta = goal - self.current;
        if delta.abs() > SETTLE_BAND {
            if delta > 0.0 {
                self.current += delta.min(rise);
            } else {
                self.current -= (-delta).min(fall);
            }
        }

        self.current += rng.random_range(-jitter..=jitter);
    }

    /// Move the idle temperature. While the heater is off it takes one
    /// immediate idle-rate step toward the new value.
    pub fn set_idle(&mut self, idle: f64, profile: &HeaterProfile) {
        self.idle = idle;
        if self.is_active() {
            return;
        }

        let delta = idle - self.current;
        if delta > 0.0 {
            self.current += delta.min(profile.idle_warm_rate);
        } else {
            self.current -= (-delta).min(profile.idle_cool_rate);
        }
    }
}

/// Hotend, bed and chamber.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thermal {
    /// The extruder.
    pub hotend: Heater,
    /// The build plate.
    pub bed: Heater,
    /// The enclosure.
    pub chamber: Heater,
}

impl Thermal {
    /// Everything at its idle temperature.
    pub fn new(hotend_idle: f64, bed_idle: f64, chamber: f64) -> Self {
        Thermal {
            hotend: Heater::idle_at(hotend_idle),
            bed: Heater::idle_at(bed_idle),
            chamber: Heater::idle_at(chamber),
        }
    }

    /// Advance the simulated heaters by one tick.
    pub fn step(&mut self, rng: &mut impl Rng) {
        self.hotend.step(&HOTEND, rng);
        self.bed.step(&BED, rng);
    }

    /// Access a heater by kind.
    pub fn heater_mut(&mut self, kind: HeaterKind) -> &mut Heater {
        match kind {
            HeaterKind::Hotend => &mut self.hotend,
            HeaterKind::Bed => &mut self.bed,
            HeaterKind::Chamber => &mut self.chamber,
        }
    }
}

/// Whether a requested target is acceptable.
pub fn valid_target(target: f64) -> bool {
    (0.0..=MAX_TARGET).contains(&target)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_hotend_approaches_target() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut heater = Heater::idle_at(25.0);
        heater.target = 200.0;

        let mut last = heater.current;
        for _ in 0..30 {
            heater.step(&HOTEND, &mut rng);
            assert!(heater.current > last, "{} should rise past {}", heater.current, last);
            assert!(heater.current - last <= HOTEND.heat_rate + HOTEND.active_jitter * 2.0);
            last = heater.current;
        }

        for _ in 0..100 {
            heater.step(&HOTEND, &mut rng);
            assert!(heater.current <= 200.0 + SETTLE_BAND + HOTEND.active_jitter);
        }
    }

    #[test]
    fn test_bed_cools_slowly() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut heater = Heater {
            current: 100.0,
            target: 50.0,
            idle: 30.0,
        };
        heater.step(&BED, &mut rng);
        assert!((heater.current - 99.0).abs() <= BED.active_jitter);
    }

    #[test]
    fn test_idle_drift() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut heater = Heater {
            current: 60.0,
            target: 0.0,
            idle: 23.0,
        };
        heater.step(&HOTEND, &mut rng);
        assert!((heater.current - 59.0).abs() <= HOTEND.idle_jitter);

        for _ in 0..200 {
            heater.step(&HOTEND, &mut rng);
        }
        assert!((heater.current - 23.0).abs() <= SETTLE_BAND + HOTEND.idle_jitter * 2.0);
    }

    #[test]
    fn test_set_idle_bumps_only_when_off() {
        let mut off = Heater::idle_at(23.0);
        off.set_idle(40.0, &HOTEND);
        assert_eq!(off.current, 23.5);

        let mut on = Heater {
            current: 150.0,
            target: 200.0,
            idle: 23.0,
        };
        on.set_idle(40.0, &HOTEND);
        assert_eq!(on.current, 150.0);
        assert_eq!(on.idle, 40.0);
    }

    #[test]
    fn test_valid_target() {
        assert!(valid_target(0.0));
        assert!(valid_target(300.0));
        assert!(!valid_target(300.5));
        assert!(!valid_target(-1.0));
        assert!(!valid_target(f64::NAN));
    }
}
