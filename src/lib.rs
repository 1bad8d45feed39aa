pub mod config;
pub mod messaging;
pub mod models;
pub mod processing;
pub mod scan_handler;
pub mod utils;

pub use config::Config;
pub use scan_handler::{RequestHandler, ScanHandler};
