//! Configuration module for Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use harvest_engine::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Concurrency limit: {}", config.engine.concurrency);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CacheConfig, Config, EngineConfig, JobsConfig, NotifyConfig, OutputConfig, SchedulerConfig,
    SourceEntry, UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
