use groove_shared::error::validate_bpm;

use crate::error::EngineError;

/// Live engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Used when no device is involved (tests, offline sessions). The live engine
    /// replaces it with the device rate.
    pub sample_rate: u32,
    pub bpm: f64,
    pub measures: u32,
    /// How far ahead of the playhead events are scheduled.
    pub look_ahead_seconds: f64,
    /// Audio-time interval between scheduler ticks.
    pub tick_interval_seconds: f64,
    pub master_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bpm: 120.0,
            measures: 8,
            look_ahead_seconds: 0.1,
            tick_interval_seconds: 0.025,
            master_volume: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        validate_bpm(self.bpm)?;
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.measures == 0 {
            return Err(EngineError::InvalidConfig("at least one measure is required".into()));
        }
        if !(self.tick_interval_seconds > 0.0) {
            return Err(EngineError::InvalidConfig("tick interval must be positive".into()));
        }
        // Consecutive windows must overlap or notes fall through the gap
        if !(self.look_ahead_seconds > self.tick_interval_seconds) {
            return Err(EngineError::InvalidConfig(format!(
                "look-ahead {}s must exceed the tick interval {}s",
                self.look_ahead_seconds, self.tick_interval_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn look_ahead_must_cover_tick_interval() {
        let config = EngineConfig {
            look_ahead_seconds: 0.02,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn bpm_out_of_range_is_invalid_input() {
        let config = EngineConfig {
            bpm: 5.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));
    }
}
