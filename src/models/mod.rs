pub mod data;

pub use data::{IdData, ImageData, ScanRequest, ScanResponse};
