use crate::error::IndexError;
use crate::models::{IndexRecord, SearchMatch};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug)]
struct Row {
    id: String,
    content: String,
    metadata: Value,
    vector: Vec<f32>,
}

#[derive(Debug)]
struct Collection {
    dimension: usize,
    rows: Vec<Row>,
}

/// Brute-force cosine index, one collection per document.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn collection_len(&self, name: &str) -> Option<usize> {
        self.collections
            .read()
            .await
            .get(name)
            .map(|collection| collection.rows.len())
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn drop_collection(&self, name: &str) -> Result<(), IndexError> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(IndexError::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimension,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert(&self, name: &str, records: Vec<IndexRecord>) -> Result<Vec<String>, IndexError> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))?;

        if let Some(bad) = records
            .iter()
            .find(|record| record.vector.len() != collection.dimension)
        {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dimension,
                actual: bad.vector.len(),
            });
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = Uuid::new_v4().to_string();
            ids.push(id.clone());
            collection.rows.push(Row {
                id,
                content: record.content,
                metadata: record.metadata,
                vector: record.vector,
            });
        }
        Ok(ids)
    }

    async fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchMatch>, IndexError> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))?;
        if query_vector.len() != collection.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dimension,
                actual: query_vector.len(),
            });
        }

        let mut matches = collection
            .rows
            .iter()
            .map(|row| SearchMatch {
                id: row.id.clone(),
                content: row.content.clone(),
                metadata: row.metadata.clone(),
                score: cosine_sim(query_vector, &row.vector),
            })
            .collect::<Vec<_>>();
        matches.sort_by(|left, right| {
            right
                .score
                .partial_cmp(&left.score)
                .unwrap_or(Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}
