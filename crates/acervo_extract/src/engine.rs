//! Local OCR engines and the process-wide engine pool.
//!
//! Engines are not concurrency-safe, so workers lease one for the duration
//! of a page run and return it afterwards. The pool is bounded; leasing
//! waits when every engine is out.

use std::path::Path;
use std::sync::Arc;

use acervo_protocol::{PipelineError, PipelineResult};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Result of recognizing one page image.
#[derive(Debug, Clone, Default)]
pub struct OcrPage {
    pub text: String,
    /// Mean character confidence in [0, 1].
    pub confidence: f64,
}

/// A local recognizer. Implementations are blocking; callers run them via
/// `spawn_blocking`.
pub trait OcrEngine: Send + 'static {
    fn name(&self) -> &'static str;
    fn recognize(&mut self, image_path: &Path) -> PipelineResult<OcrPage>;
}

/// Fixed-size pool of leased engines.
pub struct EnginePool<E: OcrEngine> {
    engines: Arc<Mutex<Vec<E>>>,
    permits: Arc<Semaphore>,
}

impl<E: OcrEngine> Clone for EnginePool<E> {
    fn clone(&self) -> Self {
        Self {
            engines: Arc::clone(&self.engines),
            permits: Arc::clone(&self.permits),
        }
    }
}

/// An engine checked out of the pool. Returned on drop.
pub struct EngineLease<E: OcrEngine> {
    engine: Option<E>,
    pool: EnginePool<E>,
    _permit: OwnedSemaphorePermit,
}

impl<E: OcrEngine> EnginePool<E> {
    pub fn new(engines: Vec<E>) -> Self {
        let permits = Arc::new(Semaphore::new(engines.len()));
        Self {
            engines: Arc::new(Mutex::new(engines)),
            permits,
        }
    }

    pub async fn lease(&self) -> PipelineResult<EngineLease<E>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::invariant("engine pool closed"))?;
        let engine = self
            .engines
            .lock()
            .await
            .pop()
            .ok_or_else(|| PipelineError::invariant("engine pool empty despite permit"))?;
        Ok(EngineLease {
            engine: Some(engine),
            pool: self.clone(),
            _permit: permit,
        })
    }
}

impl<E: OcrEngine> EngineLease<E> {
    /// Run blocking recognition on the leased engine. The lease travels
    /// into the blocking task and back so the engine returns to the pool
    /// even on failure.
    pub async fn recognize(mut self, image_path: std::path::PathBuf) -> (Self, PipelineResult<OcrPage>) {
        let mut engine = self.engine.take().expect("engine present until drop");
        let (engine, result) = tokio::task::spawn_blocking(move || {
            let result = engine.recognize(&image_path);
            (engine, result)
        })
        .await
        .expect("ocr engine task panicked");
        self.engine = Some(engine);
        (self, result)
    }
}

impl<E: OcrEngine> Drop for EngineLease<E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            // try_lock cannot fail here in practice; if it does the engine
            // is dropped and the permit still frees the slot
            if let Ok(mut engines) = self.pool.engines.try_lock() {
                engines.push(engine);
            }
        }
    }
}

// ============================================================================
// Tesseract engine (feature "ocr")
// ============================================================================

#[cfg(feature = "ocr")]
pub mod tesseract_engine {
    use super::{OcrEngine, OcrPage};
    use acervo_protocol::{PipelineError, PipelineResult, PipelineTier};
    use std::path::Path;

    /// Tesseract-backed recognizer. `lang` follows tesseract conventions
    /// ("por", "por+eng").
    pub struct TesseractEngine {
        lang: String,
    }

    impl TesseractEngine {
        pub fn new(lang: &str) -> Self {
            Self {
                lang: lang.to_string(),
            }
        }
    }

    impl OcrEngine for TesseractEngine {
        fn name(&self) -> &'static str {
            "tesseract"
        }

        fn recognize(&mut self, image_path: &Path) -> PipelineResult<OcrPage> {
            let path = image_path
                .to_str()
                .ok_or_else(|| PipelineError::invariant("non-utf8 image path"))?;
            let mut api = tesseract::Tesseract::new(None, Some(&self.lang))
                .map_err(|e| PipelineError::permanent(PipelineTier::LocalOcr, e.to_string()))?
                .set_image(path)
                .map_err(|e| PipelineError::permanent(PipelineTier::LocalOcr, e.to_string()))?;
            let text = api
                .get_text()
                .map_err(|e| PipelineError::permanent(PipelineTier::LocalOcr, e.to_string()))?;
            let confidence = f64::from(api.mean_text_conf()) / 100.0;
            Ok(OcrPage {
                text,
                confidence: confidence.clamp(0.0, 1.0),
            })
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use acervo_protocol::PipelineTier;

    /// Scripted engine for tests: returns queued pages in order.
    pub struct FakeEngine {
        pub pages: std::collections::VecDeque<OcrPage>,
    }

    impl FakeEngine {
        pub fn with_pages(pages: Vec<OcrPage>) -> Self {
            Self {
                pages: pages.into(),
            }
        }
    }

    impl OcrEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn recognize(&mut self, _image_path: &Path) -> PipelineResult<OcrPage> {
            self.pages
                .pop_front()
                .ok_or_else(|| PipelineError::permanent(PipelineTier::LocalOcr, "no more pages"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeEngine;
    use super::*;

    #[tokio::test]
    async fn test_lease_runs_and_returns_engine() {
        let pool = EnginePool::new(vec![FakeEngine::with_pages(vec![
            OcrPage {
                text: "primeira".to_string(),
                confidence: 0.9,
            },
            OcrPage {
                text: "segunda".to_string(),
                confidence: 0.8,
            },
        ])]);

        let lease = pool.lease().await.unwrap();
        let (lease, page) = lease.recognize("a.png".into()).await;
        assert_eq!(page.unwrap().text, "primeira");
        drop(lease);

        // engine returned: the second lease continues the same script
        let lease = pool.lease().await.unwrap();
        let (_lease, page) = lease.recognize("b.png".into()).await;
        assert_eq!(page.unwrap().text, "segunda");
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = EnginePool::new(vec![FakeEngine::with_pages(vec![OcrPage::default()])]);
        let lease = pool.lease().await.unwrap();

        // a second lease must wait until the first is dropped
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), pool.lease());
        assert!(pending.await.is_err());

        drop(lease);
        assert!(pool.lease().await.is_ok());
    }
}
