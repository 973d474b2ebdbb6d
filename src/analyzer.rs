//! `AnalyzeImages(urls) -> EquipmentAttributes`, used by listing forms to prefill brand/model
//! before a price is requested. Runs outside the price pipeline.

use crate::config::env_parse;
use crate::error::PriceError;
use crate::llm::{LlmClient, LlmMessage};
use crate::models::EquipmentAttributes;
use std::{collections::HashSet, sync::Arc};
use tracing::warn;

const ANALYZE_FUNCTION: &str = "equipment_image_analysis";

#[derive(Clone, Default)]
pub struct EquipmentAnalyzer {
    llm: Option<Arc<LlmClient>>,
}

impl EquipmentAnalyzer {
    pub fn new(llm: Option<Arc<LlmClient>>) -> Self {
        Self { llm }
    }

    pub async fn analyze_images(
        &self,
        image_urls: &[String],
    ) -> Result<EquipmentAttributes, PriceError> {
        let urls = resolve_image_urls(image_urls)?;
        let Some(llm) = &self.llm else {
            return Err(PriceError::unavailable(
                "analyze_images",
                "llm gateway not configured",
            ));
        };
        let prompt = format!(
            "Identify the industrial or laboratory equipment shown in these images: {}. \
             Reply with a single JSON object with keys brand, model, category, description, \
             specifications (object) and confidence (0-1). Use null for unknown fields.",
            urls.join(", ")
        );
        let mut attributes: EquipmentAttributes = llm
            .chat_json(ANALYZE_FUNCTION, &[LlmMessage::user(prompt)])
            .await
            .map_err(|err| {
                warn!(target = "pricectx.api", error = %err, "image_analysis_failed");
                PriceError::internal("analyze_images", err.to_string())
            })?;
        attributes.confidence = attributes.confidence.clamp(0.0, 1.0);
        Ok(attributes)
    }
}

fn max_images_allowed() -> usize {
    env_parse::<usize>("MAX_IMAGES")
        .filter(|v| *v >= 1)
        .unwrap_or(6)
}

/// Trims, de-duplicates and checks that every URL is http(s).
pub fn resolve_image_urls(image_urls: &[String]) -> Result<Vec<String>, PriceError> {
    let mut seen = HashSet::new();
    let resolved: Vec<String> = image_urls
        .iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .filter(|url| seen.insert(url.clone()))
        .collect();

    if resolved.is_empty() {
        return Err(PriceError::invalid_input(
            "analyze_images",
            "no images provided",
        ));
    }
    if resolved.len() > max_images_allowed() {
        return Err(PriceError::invalid_input(
            "analyze_images",
            "too_many_images",
        ));
    }
    for url in &resolved {
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(_) => {
                return Err(PriceError::invalid_input(
                    "analyze_images",
                    format!("unsupported_url_scheme: {url}"),
                ));
            }
            Err(_) => {
                return Err(PriceError::invalid_input(
                    "analyze_images",
                    format!("invalid_image_url: {url}"),
                ));
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PriceErrorKind;

    #[test]
    fn image_urls_are_deduplicated() {
        let urls = resolve_image_urls(&[
            "https://example.com/a.jpg".to_string(),
            " https://example.com/a.jpg ".to_string(),
            "https://example.com/b.jpg".to_string(),
        ])
        .expect("urls");
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let err = resolve_image_urls(&["file:///etc/passwd".to_string()]).expect_err("reject");
        assert_eq!(err.kind(), PriceErrorKind::InvalidInput);
        assert_eq!(err.stage(), "analyze_images");
    }

    #[tokio::test]
    async fn analyzer_without_gateway_is_unavailable() {
        let err = EquipmentAnalyzer::default()
            .analyze_images(&["https://example.com/a.jpg".to_string()])
            .await
            .expect_err("no gateway");
        assert_eq!(err.kind(), PriceErrorKind::Unavailable);
    }
}
