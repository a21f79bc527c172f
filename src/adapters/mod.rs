// Adapters layer: concrete implementations for external systems (address base, file cache).

pub mod ban;
pub mod single_flight;
pub mod storage;
