use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SluiceConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub soak: SoakSection,
}

/// Ring geometry shared by every channel.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct QueueSection {
    #[serde(default = "defaults::block_size")]
    pub block_size: usize,
    #[serde(default = "defaults::num_blocks")]
    pub num_blocks: usize,
    #[serde(default = "defaults::channels")]
    pub channels: usize,
    #[serde(default = "defaults::sample_rate")]
    pub sample_rate: u32,
}

/// Knobs for the acquisition/drain soak harness.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SoakSection {
    #[serde(default = "defaults::duration_secs")]
    pub duration_secs: u64,
    /// Samples per channel handed to each `write_channel` call.
    #[serde(default = "defaults::write_block_len")]
    pub write_block_len: usize,
    /// Per-channel cap for each read session; 0 drains everything ready.
    #[serde(default)]
    pub read_max: usize,
    #[serde(default = "defaults::poll_interval_us")]
    pub poll_interval_us: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    pub fn log_level() -> String {
        "info".into()
    }

    pub fn block_size() -> usize {
        1024
    }

    pub fn num_blocks() -> usize {
        64
    }

    pub fn channels() -> usize {
        16
    }

    pub fn sample_rate() -> u32 {
        30_000
    }

    pub fn duration_secs() -> u64 {
        5
    }

    pub fn write_block_len() -> usize {
        1024
    }

    pub fn poll_interval_us() -> u64 {
        2_000
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            block_size: defaults::block_size(),
            num_blocks: defaults::num_blocks(),
            channels: defaults::channels(),
            sample_rate: defaults::sample_rate(),
        }
    }
}

impl Default for SoakSection {
    fn default() -> Self {
        Self {
            duration_secs: defaults::duration_secs(),
            write_block_len: defaults::write_block_len(),
            read_max: 0,
            poll_interval_us: defaults::poll_interval_us(),
        }
    }
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            queue: QueueSection::default(),
            soak: SoakSection::default(),
        }
    }
}

impl SluiceConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: SluiceConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.queue;
        if q.block_size == 0 {
            return Err(ConfigError::Invalid("queue.block_size must be non-zero"));
        }
        if q.num_blocks == 0 {
            return Err(ConfigError::Invalid("queue.num_blocks must be non-zero"));
        }
        let Some(capacity) = q.block_size.checked_mul(q.num_blocks) else {
            return Err(ConfigError::Invalid("queue capacity overflows"));
        };
        if capacity.checked_mul(q.channels).is_none() {
            return Err(ConfigError::Invalid("queue sample store size overflows"));
        }
        if q.sample_rate == 0 {
            return Err(ConfigError::Invalid("queue.sample_rate must be non-zero"));
        }
        if self.soak.write_block_len == 0 {
            return Err(ConfigError::Invalid("soak.write_block_len must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = SluiceConfig::parse("").unwrap();
        assert_eq!(cfg, SluiceConfig::default());
        assert_eq!(cfg.queue.block_size, 1024);
        assert_eq!(cfg.soak.read_max, 0);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = SluiceConfig::parse(
            r#"
            log_level = "debug"

            [queue]
            block_size = 4
            num_blocks = 2
            channels = 3

            [soak]
            read_max = 100
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.queue.block_size, 4);
        assert_eq!(cfg.queue.num_blocks, 2);
        assert_eq!(cfg.queue.channels, 3);
        assert_eq!(cfg.queue.sample_rate, 30_000);
        assert_eq!(cfg.soak.read_max, 100);
        assert_eq!(cfg.soak.duration_secs, 5);
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let err = SluiceConfig::parse("[queue]\nnum_blocks = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn store_size_overflow_is_rejected() {
        let mut cfg = SluiceConfig::default();
        cfg.queue.block_size = 1 << 62;
        cfg.queue.num_blocks = 1;
        cfg.queue.channels = 4;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        cfg.queue.channels = 2;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = SluiceConfig::parse("[queue\nblock_size = 4").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SluiceConfig::load("/nonexistent/sluice.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
