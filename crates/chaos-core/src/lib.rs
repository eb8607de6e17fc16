pub mod config;
pub mod services;
pub mod types;
pub mod validation;

pub use config::*;
pub use services::*;
pub use types::*;
pub use validation::*;
