pub mod config;
pub mod engine;
pub mod executor;
pub mod logging;
pub mod model;
pub mod session;
pub mod traits;

// Re-export common types for convenience
pub use config::*;
pub use engine::ZipEngine;
pub use executor::*;
pub use model::*;
pub use session::*;
pub use traits::*;
