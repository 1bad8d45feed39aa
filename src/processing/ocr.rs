use std::path::Path;

use crate::utils::ScanError;

/// Turns an image file into recognized text.
///
/// Implementations are blocking and CPU bound; callers run them off the
/// async executor.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, image_path: &Path, language: &str) -> Result<String, ScanError>;
}

#[cfg(feature = "tesseract")]
pub use self::engine::TesseractExtractor;

#[cfg(feature = "tesseract")]
mod engine {
    use std::path::Path;

    use log::debug;
    use tesseract::Tesseract;

    use super::TextExtractor;
    use crate::utils::ScanError;

    /// Tesseract binding. Every call opens and closes its own engine
    /// session; instances are never shared between threads.
    pub struct TesseractExtractor {
        data_path: Option<String>,
    }

    impl TesseractExtractor {
        /// `data_path` points at a tessdata directory; `None` uses the
        /// engine's default lookup (`TESSDATA_PREFIX`).
        pub fn new(data_path: Option<String>) -> Self {
            TesseractExtractor { data_path }
        }
    }

    impl TextExtractor for TesseractExtractor {
        fn extract(&self, image_path: &Path, language: &str) -> Result<String, ScanError> {
            let image_path_str = image_path.to_str().ok_or_else(|| {
                ScanError::Engine(format!("Image path is not valid UTF-8: {}", image_path.display()))
            })?;

            debug!("Running tesseract ({}) on {}", language, image_path_str);

            let text = Tesseract::new(self.data_path.as_deref(), Some(language))
                .map_err(|e| ScanError::Engine(format!("Tesseract init error: {}", e)))?
                .set_image(image_path_str)
                .map_err(|e| ScanError::Engine(format!("Tesseract set image error: {}", e)))?
                .get_text()
                .map_err(|e| ScanError::Engine(format!("Tesseract error: {}", e)))?;

            Ok(text)
        }
    }
}
