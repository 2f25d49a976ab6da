// src/config/mod.rs

//! TOML configuration: raw model, validation, loading.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, DispatchConfig, HeartbeatConfig, MasterConfig, RawConfigFile};
