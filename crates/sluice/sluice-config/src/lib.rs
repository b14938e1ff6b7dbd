pub mod config;

pub use config::{ConfigError, QueueSection, SluiceConfig, SoakSection};
