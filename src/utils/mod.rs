pub mod error;
pub mod logger;
pub mod shutdown;

pub use error::ScanError;
