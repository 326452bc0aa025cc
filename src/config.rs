use std::path::Path;

use crate::error::DecodeError;

/// Tuning surface of the beam search.
///
/// `cutoff_prob` and `cutoff_top_n` bound how many classes are expanded per
/// timestep; `num_processes` sizes the worker pool used by batch decoding.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub beam_size: usize,
    pub cutoff_prob: f64,
    pub cutoff_top_n: usize,
    pub num_processes: usize,
}

impl DecoderConfig {
    pub const DEFAULT_BEAM_SIZE: usize = 500;
    pub const DEFAULT_CUTOFF_PROB: f64 = 1.0;
    pub const DEFAULT_CUTOFF_TOP_N: usize = 40;

    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::io("read decoder config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| DecodeError::json("parse decoder config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.beam_size == 0 {
            return Err(DecodeError::invalid_input("beam_size must be at least 1"));
        }
        if !(self.cutoff_prob > 0.0 && self.cutoff_prob <= 1.0) {
            return Err(DecodeError::invalid_input(format!(
                "cutoff_prob must be in (0, 1], got {}",
                self.cutoff_prob
            )));
        }
        if self.cutoff_top_n == 0 {
            return Err(DecodeError::invalid_input("cutoff_top_n must be at least 1"));
        }
        if self.num_processes == 0 {
            return Err(DecodeError::invalid_input(
                "num_processes must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            beam_size: Self::DEFAULT_BEAM_SIZE,
            cutoff_prob: Self::DEFAULT_CUTOFF_PROB,
            cutoff_top_n: Self::DEFAULT_CUTOFF_TOP_N,
            num_processes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_config_default() {
        let config = DecoderConfig::default();
        assert_eq!(config.beam_size, DecoderConfig::DEFAULT_BEAM_SIZE);
        assert_eq!(config.cutoff_prob, 1.0);
        assert_eq!(config.cutoff_top_n, 40);
        assert!(config.num_processes >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn decoder_config_from_json_with_partial_fields() {
        let json = r#"{ "beam_size": 16, "cutoff_top_n": 8 }"#;
        let config: DecoderConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.beam_size, 16);
        assert_eq!(config.cutoff_top_n, 8);
        assert_eq!(config.cutoff_prob, 1.0);
    }

    #[test]
    fn decoder_config_rejects_zero_beam() {
        let config = DecoderConfig {
            beam_size: 0,
            ..DecoderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn decoder_config_rejects_out_of_range_cutoff_prob() {
        for bad in [0.0, -0.5, 1.5] {
            let config = DecoderConfig {
                cutoff_prob: bad,
                ..DecoderConfig::default()
            };
            assert!(config.validate().is_err(), "cutoff_prob {bad} accepted");
        }
    }

    #[test]
    fn decoder_config_rejects_zero_workers() {
        let config = DecoderConfig {
            num_processes: 0,
            ..DecoderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
