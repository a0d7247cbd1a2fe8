pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod server;
pub mod startup;
pub mod weights;

pub use error::{Error, Result};
