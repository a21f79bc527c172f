pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::toml_config::TomlConfig;

pub use adapters::{ban::BanAddressRepository, storage::LocalStorage};
pub use core::{municipality_index::MunicipalityIndex, planner::Planner, resolver::CityResolver};
pub use utils::error::{Result, TractError};
