use crate::error::{PlanoraError, Result};

/// Flat, exact nearest-neighbour index over squared L2 distance.
#[derive(Debug, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
    documents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub document: String,
    pub distance: f32,
}

impl VectorIndex {
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Appends embeddings with their source texts. The batch is rejected as a
    /// whole when any vector disagrees with the index dimension.
    pub fn add(&mut self, embeddings: Vec<Vec<f32>>, texts: Vec<String>) -> Result<usize> {
        if embeddings.len() != texts.len() {
            return Err(PlanoraError::Runtime(format!(
                "vector index: {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        let Some(first) = embeddings.first() else {
            return Ok(0);
        };
        let dimension = self.dimension.unwrap_or(first.len());
        if dimension == 0 {
            return Err(PlanoraError::Runtime(
                "vector index: empty embedding".to_string(),
            ));
        }
        if let Some(bad) = embeddings.iter().find(|vector| vector.len() != dimension) {
            return Err(PlanoraError::Runtime(format!(
                "vector index: dimension mismatch, expected {dimension}, got {}",
                bad.len()
            )));
        }

        self.dimension = Some(dimension);
        let added = embeddings.len();
        self.vectors.extend(embeddings);
        self.documents.extend(texts);
        Ok(added)
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dimension) = self.dimension {
            if query.len() != dimension {
                return Err(PlanoraError::Runtime(format!(
                    "vector index: query dimension {} does not match {dimension}",
                    query.len()
                )));
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| (index, squared_l2(vector, query)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(index, distance)| SearchHit {
                document: self.documents[index].clone(),
                distance,
            })
            .collect())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
