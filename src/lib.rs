pub mod budget;
pub mod config;
pub mod error;
pub mod expense;
pub mod logging;
pub mod money;
pub mod service;
pub mod state;
pub mod store;
pub mod trail;
pub mod utils;

pub use error::{WorkflowError, WorkflowResult};
