//! Per-session volume control
//!
//! The command surface speaks 0-100; the pipeline wants a linear gain
//! factor for the transcoder's volume filter. Validation happens here,
//! before anything reaches a subprocess.

use crate::error::{Error, Result};

/// Maximum user-facing volume level
pub const MAX_VOLUME: u8 = 100;

/// Default session volume when none was configured
pub const DEFAULT_VOLUME: u8 = 30;

/// Reject volume levels outside 0-100; both bounds are valid
pub fn validate(level: i64) -> Result<u8> {
    if (0..=MAX_VOLUME as i64).contains(&level) {
        Ok(level as u8)
    } else {
        Err(Error::InvalidVolume(level))
    }
}

/// Linear gain factor for a 0-100 level
pub fn gain(level: u8) -> f32 {
    f32::from(level.min(MAX_VOLUME)) / 100.0
}

/// Per-session target volume, applied at transcode time
#[derive(Debug, Clone, Copy)]
pub struct VolumeController {
    level: u8,
}

impl VolumeController {
    pub fn new(level: u8) -> Self {
        Self {
            level: level.min(MAX_VOLUME),
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn set_level(&mut self, level: u8) {
        self.level = level.min(MAX_VOLUME);
    }

    /// Effective level for a track, honoring its per-track override
    pub fn effective_level(&self, volume_override: Option<u8>) -> u8 {
        volume_override.map(|v| v.min(MAX_VOLUME)).unwrap_or(self.level)
    }
}

impl Default for VolumeController {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_values_valid() {
        assert_eq!(validate(0).unwrap(), 0);
        assert_eq!(validate(100).unwrap(), 100);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(validate(-1), Err(Error::InvalidVolume(-1))));
        assert!(matches!(validate(101), Err(Error::InvalidVolume(101))));
    }

    #[test]
    fn test_gain_mapping() {
        assert_eq!(gain(0), 0.0);
        assert_eq!(gain(100), 1.0);
        assert!((gain(30) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_effective_level_override() {
        let volume = VolumeController::new(30);
        assert_eq!(volume.effective_level(None), 30);
        assert_eq!(volume.effective_level(Some(80)), 80);
        assert_eq!(volume.effective_level(Some(255)), MAX_VOLUME);
    }
}
