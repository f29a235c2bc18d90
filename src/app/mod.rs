pub mod config;

pub use config::{Config, DedupeConfig, LogSourceConfig, MatcherConfig, PublisherConfig};
