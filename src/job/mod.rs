pub mod driver;
pub mod error;
pub mod executor;
pub mod handler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export common types
pub use driver::{DriverSettings, JobDriver};
pub use error::JobError;
pub use executor::TaskExecutor;
pub use handler::{HttpHandler, RemoteHandler};
pub use types::*;
