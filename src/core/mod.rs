pub mod config;
pub mod error;
pub mod types;

pub use config::ControlPlaneConfig;
pub use error::{ControlPlaneError, ControlPlaneResult};
