use crate::catalog::embedding;
use crate::error::PipelineError;
use crate::models::AppliedConfig;
use crate::traits::Embedder;
use async_trait::async_trait;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
const DEFAULT_NGRAM_SIZE: usize = 3;

/// Hashed character n-gram counts, L2-normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    pub ngram_size: usize,
    pub lowercase: bool,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            ngram_size: DEFAULT_NGRAM_SIZE,
            lowercase: true,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn from_config(config: &AppliedConfig) -> Result<Self, PipelineError> {
        let fallback = Self::default();
        Ok(Self {
            dimensions: config.u64_or(embedding::DIMENSIONS, fallback.dimensions as u64)? as usize,
            ngram_size: config.u64_or(embedding::NGRAM_SIZE, fallback.ngram_size as u64)? as usize,
            lowercase: config.bool_or(embedding::LOWERCASE, fallback.lowercase)?,
        })
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let prepared = if self.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        let chars: Vec<char> = prepared.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let width = self.ngram_size.clamp(1, chars.len());
        for window in chars.windows(width) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        config: &AppliedConfig,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        let configured = Self::from_config(config)?;
        Ok(texts.iter().map(|text| configured.embed_text(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfigMap;
    use serde_json::json;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_text("Hydraulic pressure and flow");
        let second = embedder.embed_text("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn short_text_still_embeds() {
        let embedder = CharacterNgramEmbedder {
            dimensions: 32,
            ngram_size: 5,
            lowercase: true,
        };
        let vector = embedder.embed_text("ab");
        assert_eq!(vector.len(), 32);
        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn config_drives_shape_and_case() {
        let values: ConfigMap = serde_json::from_value(json!({
            "dimensions": 64,
            "ngram_size": 2,
            "lowercase": false
        }))
        .expect("object");
        let config = AppliedConfig::new(values);
        let configured = CharacterNgramEmbedder::from_config(&config).expect("readable");
        assert_eq!(configured.dimensions, 64);
        assert!(!configured.lowercase);

        // "Pu" and "pu" fall in different buckets at 64 dimensions.
        let vectors = CharacterNgramEmbedder::default()
            .embed(&["Pump".to_string(), "pump".to_string()], &config)
            .await
            .expect("embed");
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
        assert_ne!(vectors[0], vectors[1]);

        let folded = CharacterNgramEmbedder {
            lowercase: true,
            ..configured
        };
        assert_eq!(folded.embed_text("Pump"), folded.embed_text("pump"));
    }

    #[test]
    fn unreadable_config_is_rejected() {
        let values: ConfigMap =
            serde_json::from_value(json!({"dimensions": 63.5})).expect("object");
        let error = CharacterNgramEmbedder::from_config(&AppliedConfig::new(values))
            .expect_err("fractional dimensions");
        assert_eq!(error.status_code(), 400);
    }
}
