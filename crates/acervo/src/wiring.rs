//! System wiring: store location, extractor stack, provider clients.

use std::path::PathBuf;
use std::sync::Arc;

use acervo_extract::{
    AiClient, Cascade, CloudOcrExtractor, HttpAiClient, HttpOcrClient, NativeTextExtractor,
    TierExtractor, VisionExtractor,
};
use acervo_protocol::PipelineConfig;
use acervo_store::Store;
use anyhow::Result;
use tracing::info;

/// Environment variables carrying provider credentials; never stored in
/// config files.
const CLOUD_OCR_KEY_ENV: &str = "ACERVO_CLOUD_OCR_KEY";
const VISION_KEY_ENV: &str = "ACERVO_VISION_KEY";

/// Database location under the app home.
pub fn database_path() -> PathBuf {
    acervo_logging::acervo_home().join("acervo.db")
}

/// Config file location under the app home.
pub fn config_path() -> PathBuf {
    acervo_logging::acervo_home().join("config.toml")
}

pub async fn open_store() -> Result<Store> {
    let path = database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Store::open(&path).await?)
}

/// Assemble the tier stack from configuration. Tiers without a usable
/// backend are simply not registered; the cascade escalates past them.
pub fn build_cascade(config: &PipelineConfig) -> Cascade {
    let mut extractors: Vec<Box<dyn TierExtractor>> = vec![Box::new(NativeTextExtractor)];

    #[cfg(feature = "ocr")]
    {
        use acervo_extract::engine::tesseract_engine::TesseractEngine;
        use acervo_extract::{EnginePool, LocalOcrExtractor};

        let primary = EnginePool::new(vec![
            TesseractEngine::new("por"),
            TesseractEngine::new("por"),
        ]);
        let secondary = EnginePool::new(vec![TesseractEngine::new("por+eng")]);
        extractors.push(Box::new(LocalOcrExtractor::new(
            primary,
            Some(secondary),
            config.min_confidence_local,
            config.enable_preprocessing,
        )));
        info!("local OCR tier enabled (tesseract)");
    }

    if config.enable_cloud_ocr {
        if let Some(endpoint) = &config.cloud_ocr_endpoint {
            let client = HttpOcrClient::new(endpoint.clone(), std::env::var(CLOUD_OCR_KEY_ENV).ok());
            extractors.push(Box::new(CloudOcrExtractor::new(Arc::new(client))));
            info!(endpoint, "cloud OCR tier enabled");
        }
    }

    let ai: Option<Arc<dyn AiClient>> = config.vision_endpoint.as_ref().map(|endpoint| {
        let client = HttpAiClient::new(
            endpoint.clone(),
            config.vision_model.clone(),
            std::env::var(VISION_KEY_ENV).ok(),
        );
        Arc::new(client) as Arc<dyn AiClient>
    });

    if config.enable_vision {
        if let Some(ai) = &ai {
            extractors.push(Box::new(VisionExtractor::new(Arc::clone(ai))));
            info!(model = %config.vision_model, "vision tier enabled");
        }
    }

    Cascade::new(config, extractors, ai)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cascade_with_defaults() {
        // no provider endpoints configured: native tier only, no panic
        let config = PipelineConfig::default();
        let _cascade = build_cascade(&config);
    }
}
