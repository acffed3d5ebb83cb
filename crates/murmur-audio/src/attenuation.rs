//! Distance attenuation for proximity audio

use murmur_core::{Position, VoiceConfig};

/// Linear falloff between a full-volume radius and a fade distance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attenuation {
    full_volume_radius: f64,
    fade_distance: f64,
}

impl Attenuation {
    /// `fade_distance` is raised to at least `full_volume_radius`
    pub fn new(full_volume_radius: f64, fade_distance: f64) -> Self {
        let full_volume_radius = full_volume_radius.max(0.0);
        Attenuation {
            full_volume_radius,
            fade_distance: fade_distance.max(full_volume_radius),
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(config.full_volume_radius, config.fade_distance)
    }

    pub fn full_volume_radius(&self) -> f64 {
        self.full_volume_radius
    }

    pub fn fade_distance(&self) -> f64 {
        self.fade_distance
    }

    /// Gain for a source at `distance`: 1.0 inside the radius, 0.0 at or
    /// beyond the fade distance, strictly decreasing in between
    pub fn gain(&self, distance: f64) -> f32 {
        if !distance.is_finite() {
            return 0.0;
        }
        if distance <= self.full_volume_radius {
            return 1.0;
        }
        if distance >= self.fade_distance {
            return 0.0;
        }
        ((self.fade_distance - distance) / (self.fade_distance - self.full_volume_radius)) as f32
    }

    /// Gain between two positions
    pub fn gain_between(&self, listener: Position, source: Position) -> f32 {
        self.gain(listener.distance(&source))
    }
}

impl Default for Attenuation {
    fn default() -> Self {
        Self::from_config(&VoiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_volume_inside_radius() {
        let att = Attenuation::new(5.0, 30.0);
        assert_eq!(att.gain(0.0), 1.0);
        assert_eq!(att.gain(5.0), 1.0);
    }

    #[test]
    fn test_zero_at_and_beyond_fade() {
        let att = Attenuation::new(5.0, 30.0);
        assert_eq!(att.gain(30.0), 0.0);
        assert_eq!(att.gain(1_000.0), 0.0);
        assert_eq!(att.gain(f64::NAN), 0.0);
    }

    #[test]
    fn test_strictly_decreasing_between() {
        let att = Attenuation::new(5.0, 30.0);
        let mut previous = att.gain(5.0);
        let mut d = 5.5;
        while d < 30.0 {
            let g = att.gain(d);
            assert!(g < previous, "gain at {} not below {}", d, previous);
            assert!(g > 0.0);
            previous = g;
            d += 0.5;
        }
    }

    #[test]
    fn test_gain_between_positions() {
        let att = Attenuation::new(5.0, 30.0);
        let listener = Position::new(0.0, 64.0, 0.0);
        assert_eq!(att.gain_between(listener, Position::new(3.0, 64.0, 4.0)), 1.0);
        assert_eq!(att.gain_between(listener, Position::new(30.0, 64.0, 0.0)), 0.0);
    }

    #[test]
    fn test_degenerate_fade_is_a_hard_edge() {
        let att = Attenuation::new(10.0, 2.0);
        assert_eq!(att.fade_distance(), 10.0);
        assert_eq!(att.gain(10.0), 1.0);
        assert_eq!(att.gain(10.1), 0.0);
    }
}
