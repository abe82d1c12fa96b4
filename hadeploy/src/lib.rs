pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod models;
pub mod netdiag;
pub mod orchestrator;
pub mod roles;
pub mod session;
pub mod tester;
pub mod transfer;
pub mod validate;
pub mod vault;

pub use error::Error;
pub use error::Result;
