pub mod config;
pub mod error;
pub mod event;

pub use error::{AutoLoginError, EventBusError};
