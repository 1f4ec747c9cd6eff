// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: turning the raw model into a validated [`ConfigFile`]
//!   with a resolved pipeline [`Library`](crate::pipeline::Library).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    CableConfig, ConfigFile, MaintenanceSection, ManagerSection, MethodConfig,
    OutputCableConfig, PipelineConfig, RawConfigFile, SchedulerSection, StepConfig,
};
