//! Print progress simulation.

use flashforge::status::Persona;
use rand::Rng;

/// Progress increment for one tick, in percent.
pub fn increment(persona: Persona, rng: &mut impl Rng) -> f64 {
    match persona {
        Persona::Legacy => 1.0,
        Persona::FiveM => rng.random_range(0.01..=0.05),
    }
}

/// Layer reached at a progress percentage.
pub fn layer_at(progress: f64, total_layers: u32) -> u32 {
    (progress.clamp(0.0, 100.0) / 100.0 * f64::from(total_layers)).floor() as u32
}

/// Remaining seconds extrapolated from elapsed time and progress. With no
/// progress yet the estimate is returned unchanged.
pub fn remaining_time(duration: u64, progress: f64, estimate: u64) -> u64 {
    if progress <= 0.0 {
        return estimate;
    }
    let elapsed = duration as f64;
    (elapsed * 100.0 / progress - elapsed).max(0.0).round() as u64
}

/// Layer shown by `~M27`, out of a fixed 100.
pub fn m27_layer(progress: f64) -> u32 {
    if progress <= 0.0 {
        0
    } else {
        layer_at(progress, 100).max(1)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_increment_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(increment(Persona::Legacy, &mut rng), 1.0);
        for _ in 0..1000 {
            let step = increment(Persona::FiveM, &mut rng);
            assert!((0.01..=0.05).contains(&step));
        }
    }

    #[test]
    fn test_layer_at() {
        assert_eq!(layer_at(0.0, 250), 0);
        assert_eq!(layer_at(50.0, 250), 125);
        assert_eq!(layer_at(100.0, 250), 250);
        assert_eq!(layer_at(150.0, 250), 250);
    }

    #[test]
    fn test_remaining_time() {
        assert_eq!(remaining_time(0, 0.0, 3600), 3600);
        assert_eq!(remaining_time(600, 25.0, 3600), 1800);
        assert_eq!(remaining_time(3600, 100.0, 3600), 0);
    }

    #[test]
    fn test_m27_layer() {
        assert_eq!(m27_layer(0.0), 0);
        assert_eq!(m27_layer(0.3), 1);
        assert_eq!(m27_layer(42.9), 42);
    }
}
