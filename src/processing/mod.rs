pub mod extractors;
pub mod ocr;
pub mod temp_store;

pub use extractors::FieldParser;
pub use ocr::TextExtractor;
#[cfg(feature = "tesseract")]
pub use ocr::TesseractExtractor;
pub use temp_store::{TempImage, TempStore};
