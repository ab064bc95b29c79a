//! Concurrent simulation core for a fleet of grid storage-retrieval robots.
//!
//! [`grid::WarehouseGrid`] holds stock and occupancy behind one reader/writer
//! lock, each robot runs its own actor thread fed by a bounded command queue,
//! and [`dispatcher::OrderDispatcher`] matches pending orders to idle robots on
//! every externally triggered tick. [`warehouse::Warehouse`] ties them together.

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod grid;
pub mod logging;
pub mod orders;
pub mod robot;
pub mod sim;
pub mod types;
pub mod warehouse;

pub use error::{Result, WarehouseError};
