use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::Semaphore;

use crate::models::{IdData, ScanRequest, ScanResponse};
use crate::processing::{FieldParser, TempStore, TextExtractor};
use crate::utils::ScanError;

/// Turns one scan request into one scan response. Never fails: problems
/// are reported inside the response.
#[async_trait]
pub trait ScanHandler: Send + Sync {
    async fn handle(&self, request: ScanRequest) -> ScanResponse;
}

/// Runs temp store, OCR and field parsing for a request.
#[derive(Clone)]
pub struct RequestHandler {
    temp_store: Arc<TempStore>,
    extractor: Arc<dyn TextExtractor>,
    language: String,
    permits: Arc<Semaphore>,
}

impl RequestHandler {
    /// `workers` caps how many OCR sessions run at once across all callers.
    pub fn new(
        temp_store: Arc<TempStore>,
        extractor: Arc<dyn TextExtractor>,
        language: impl Into<String>,
        workers: usize,
    ) -> Self {
        RequestHandler {
            temp_store,
            extractor,
            language: language.into(),
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Blocking pipeline: image -> text -> fields.
    pub fn process(&self, request: &ScanRequest) -> Result<IdData, ScanError> {
        let raw_text = if !request.image_data.is_empty() {
            let image = self.temp_store.acquire(request.image_data.as_bytes())?;
            let text = self.extractor.extract(image.path(), &self.language);
            let released = image.release();
            let text = text?;
            released?;
            text
        } else if !request.image_path.is_empty() {
            self.extractor
                .extract(Path::new(&request.image_path), &self.language)?
        } else {
            return Err(ScanError::InvalidRequest(
                "no image data or path provided".to_string(),
            ));
        };

        debug!("Extracted text for {}: {}", request.request_id, raw_text);

        Ok(FieldParser::parse(&raw_text))
    }
}

#[async_trait]
impl ScanHandler for RequestHandler {
    async fn handle(&self, request: ScanRequest) -> ScanResponse {
        let request_id = request.request_id.clone();

        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("OCR permits closed, rejecting request {}", request_id);
                return ScanResponse::failure(request_id, "service is shutting down");
            }
        };

        let handler = self.clone();
        let outcome = tokio::task::spawn_blocking(move || handler.process(&request)).await;

        match outcome {
            Ok(Ok(data)) => ScanResponse::success(request_id, data),
            Ok(Err(e)) => {
                error!("Failed to process request {} ({}): {}", request_id, e.kind(), e);
                ScanResponse::failure(request_id, e.to_string())
            }
            Err(e) => {
                error!("Processing task for {} panicked or was cancelled: {}", request_id, e);
                ScanResponse::failure(request_id, format!("processing task failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Reads the "image" as UTF-8 text; anything else is an unreadable image.
    struct TextFileExtractor;

    impl TextExtractor for TextFileExtractor {
        fn extract(&self, image_path: &Path, _language: &str) -> Result<String, ScanError> {
            let bytes = std::fs::read(image_path)
                .map_err(|e| ScanError::Engine(format!("cannot open image: {}", e)))?;
            String::from_utf8(bytes)
                .map_err(|_| ScanError::Engine("unsupported image format".to_string()))
        }
    }

    /// Records the highest number of simultaneous extractions.
    struct SlowExtractor {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TextExtractor for SlowExtractor {
        fn extract(&self, _image_path: &Path, _language: &str) -> Result<String, ScanError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    const DOCUMENT_TEXT: &str =
        "REPUBLICA MOLDOVA\nNUME: POPESCU\nPRENUME: IONEL\n1234 5678 90123\n15.03.1990\n";

    fn handler(dir: &TempDir) -> RequestHandler {
        let store = Arc::new(TempStore::new(dir.path()).unwrap());
        RequestHandler::new(store, Arc::new(TextFileExtractor), "ron", 2)
    }

    fn scratch_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    fn request(id: &str, image_data: &[u8]) -> ScanRequest {
        ScanRequest {
            request_id: id.to_string(),
            image_data: image_data.to_vec().into(),
            image_path: String::new(),
        }
    }

    #[tokio::test]
    async fn test_base64_image_produces_fields() {
        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode(DOCUMENT_TEXT);

        let response = handler(&dir).handle(request("req-1", encoded.as_bytes())).await;

        assert!(response.success);
        assert_eq!(response.request_id, "req-1");
        assert_eq!(response.error, None);
        let data = response.data.unwrap();
        assert_eq!(data.id_number, "1234567890123");
        assert_eq!(data.birth_date, "15.03.1990");
        assert_eq!(data.last_name, "POPESCU");
        assert_eq!(data.first_name, "IONEL");
        assert_eq!(data.raw_text, DOCUMENT_TEXT);
        assert_eq!(scratch_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_undecodable_image_fails() {
        let dir = TempDir::new().unwrap();

        let response = handler(&dir).handle(request("req-2", &[0xff, 0xd8, 0x00, 0x9f])).await;

        assert!(!response.success);
        assert!(response.data.is_none());
        let error = response.error.unwrap();
        assert!(error.starts_with("OCR failed"), "{}", error);
        assert_eq!(scratch_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_missing_image_fails() {
        let dir = TempDir::new().unwrap();

        let response = handler(&dir).handle(request("req-3", &[])).await;

        assert!(!response.success);
        assert_eq!(
            response.error.as_deref(),
            Some("Invalid request: no image data or path provided")
        );
    }

    #[tokio::test]
    async fn test_image_path_bypasses_temp_store() {
        let store_dir = TempDir::new().unwrap();
        let images = TempDir::new().unwrap();
        let image_path = images.path().join("id.jpg");
        std::fs::write(&image_path, DOCUMENT_TEXT).unwrap();

        let scan = ScanRequest {
            request_id: "req-4".to_string(),
            image_data: Default::default(),
            image_path: image_path.to_string_lossy().into_owned(),
        };
        let response = handler(&store_dir).handle(scan).await;

        assert!(response.success);
        assert_eq!(response.data.unwrap().id_number, "1234567890123");
        assert_eq!(scratch_count(&store_dir), 0);
    }

    #[tokio::test]
    async fn test_duplicate_requests_are_reprocessed() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let encoded = STANDARD.encode(DOCUMENT_TEXT);

        let first = handler.handle(request("dup", encoded.as_bytes())).await;
        let second = handler.handle(request("dup", encoded.as_bytes())).await;

        let (first, second) = (first.data.unwrap(), second.data.unwrap());
        assert_eq!(first.id_number, second.id_number);
        assert_eq!(first.first_name, second.first_name);
        assert_eq!(first.last_name, second.last_name);
        assert_eq!(first.birth_date, second.birth_date);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_limit_bounds_concurrent_ocr() {
        let dir = TempDir::new().unwrap();
        let extractor = Arc::new(SlowExtractor {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let store = Arc::new(TempStore::new(dir.path()).unwrap());
        let handler = RequestHandler::new(store, extractor.clone(), "eng", 1);

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(request(&i.to_string(), b"img")).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().success);
        }

        assert_eq!(extractor.peak.load(Ordering::SeqCst), 1);
    }
}
