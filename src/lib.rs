pub mod config;
pub mod crs;
pub mod data;
pub mod error;
pub mod index;
pub mod join;
pub mod legend;
pub mod palette;
pub mod processing;
pub mod render;
pub mod server;
pub mod types;
