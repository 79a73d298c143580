//! Configuration validation with range checks.

use crate::error::ConfigError;
use crate::ocr::VisionProvider;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    ///
    /// Adapter-specific keys are validated by the adapter when it is built;
    /// only the shared keys and typed sections are checked here.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(raw) = self.tiku.get("cover_rate") {
            let rate: f64 = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("tiku.cover_rate must be a number, got '{raw}'"))
            })?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::ValidationError(
                    "tiku.cover_rate must be between 0.0 and 1.0".into(),
                ));
            }
        }
        if self.ocr.image_host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ocr.image_host must not be empty".into(),
            ));
        }
        if self.ocr.download_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "ocr.download_timeout_secs must be > 0".into(),
            ));
        }
        if !matches!(self.ocr.local_device.as_str(), "gpu" | "cpu") {
            return Err(ConfigError::ValidationError(format!(
                "ocr.local_device must be \"gpu\" or \"cpu\", got '{}'",
                self.ocr.local_device
            )));
        }
        if let Some(provider) = self.ocr.vision_provider.as_deref() {
            if !provider.trim().is_empty() && provider.parse::<VisionProvider>().is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "ocr.vision_provider '{provider}' is not supported"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_cover_rate() {
        let mut config = Config::default();
        config.tiku.insert("cover_rate", "1.5");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cover_rate"));

        config.tiku.insert("cover_rate", "abc");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cover_rate"));
    }

    #[test]
    fn test_validate_rejects_zero_download_timeout() {
        let mut config = Config::default();
        config.ocr.download_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("download_timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_unknown_device() {
        let mut config = Config::default();
        config.ocr.local_device = "tpu".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("local_device"));
    }

    #[test]
    fn test_validate_rejects_unknown_vision_provider() {
        let mut config = Config::default();
        config.ocr.vision_provider = Some("mystery".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vision_provider"));
    }
}
