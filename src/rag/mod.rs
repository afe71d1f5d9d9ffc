use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::RagConfig;
use crate::error::{PlanoraError, Result};
use crate::interfaces::providers::LlmProvider;

pub mod vector_store;

pub use vector_store::{SearchHit, VectorIndex};

pub const NOT_FOUND_ANSWER: &str = "Answer not found in provided material.";
const ASSISTANT_SYSTEM_PROMPT: &str = "You are a strict academic assistant.";
const ANSWER_TEMPERATURE: f32 = 0.2;
/// Upper bound on inputs per embeddings request.
pub const MAX_EMBED_BATCH: usize = 2048;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub message: String,
    pub chunks_added: usize,
}

pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PlanoraError::Validation(format!("Could not read PDF: {e}")))?;
    let pages: Vec<&str> = text
        .split('\u{c}')
        .map(str::trim_end)
        .filter(|page| !page.trim().is_empty())
        .collect();
    Ok(pages.join("\n"))
}

/// Splits into consecutive windows of `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub fn build_answer_prompt(context: &str, question: &str) -> String {
    format!(
        "\nAnswer the question ONLY from the provided context.\n\
         If answer is not found, say \"{NOT_FOUND_ANSWER}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n"
    )
}

pub struct RagService {
    llm: Arc<dyn LlmProvider>,
    index: RwLock<VectorIndex>,
    config: RagConfig,
}

impl RagService {
    pub fn new(llm: Arc<dyn LlmProvider>, config: RagConfig) -> Self {
        let index = VectorIndex::new(config.dimension);
        Self {
            llm,
            index: RwLock::new(index),
            config,
        }
    }

    pub async fn indexed_chunks(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn process_pdf(&self, bytes: Bytes) -> Result<IngestReport> {
        let text = tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes))
            .await
            .map_err(|e| PlanoraError::Runtime(e.to_string()))??;
        self.process_text(&text).await
    }

    /// Chunks and embeds the text, then appends it to the shared index. The
    /// index only changes once every embedding batch has come back.
    pub async fn process_text(&self, text: &str) -> Result<IngestReport> {
        if text.trim().is_empty() {
            return Err(PlanoraError::Validation(
                "Document contains no extractable text".to_string(),
            ));
        }
        let chunks = chunk_text(text, self.config.chunk_size());
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(MAX_EMBED_BATCH) {
            let vectors = self
                .llm
                .embed(batch.to_vec(), Some(self.config.embedding_model()))
                .await?;
            embeddings.extend(vectors);
        }

        let added = self.index.write().await.add(embeddings, chunks)?;
        tracing::info!(chunks_added = added, "Indexed document chunks");
        Ok(IngestReport {
            message: "PDF processed successfully".to_string(),
            chunks_added: added,
        })
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        if self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }
        let query = self
            .llm
            .embed(vec![question.to_string()], Some(self.config.embedding_model()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlanoraError::Http("Embedding response was empty".to_string()))?;
        self.index.read().await.search(&query, self.config.top_k())
    }

    pub async fn answer_question(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PlanoraError::Validation("Question is required".to_string()));
        }

        let hits = self.retrieve(question).await?;
        if hits.is_empty() {
            tracing::debug!("No indexed material; answering without the model");
            return Ok(NOT_FOUND_ANSWER.to_string());
        }

        let context = hits
            .iter()
            .map(|hit| hit.document.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = build_answer_prompt(&context, question);
        self.llm
            .generate_text(&prompt, ASSISTANT_SYSTEM_PROMPT, Some(ANSWER_TEMPERATURE))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Records the size of every embeddings request and optionally fails one.
    #[derive(Default)]
    struct RecordingProvider {
        batches: Mutex<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn generate_text(&self, _: &str, _: &str, _: Option<f32>) -> Result<String> {
            Ok(String::new())
        }

        async fn embed(&self, inputs: Vec<String>, _: Option<&str>) -> Result<Vec<Vec<f32>>> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(inputs.len());
            if self.fail_on_call == Some(batches.len()) {
                return Err(PlanoraError::Http("embeddings unavailable".to_string()));
            }
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn single_char_chunks() -> RagConfig {
        RagConfig {
            chunk_size: Some(1),
            ..RagConfig::default()
        }
    }

    #[tokio::test]
    async fn large_documents_are_embedded_in_bounded_batches() {
        let provider = Arc::new(RecordingProvider::default());
        let rag = RagService::new(provider.clone(), single_char_chunks());

        let report = rag.process_text(&"x".repeat(5000)).await.unwrap();
        assert_eq!(report.chunks_added, 5000);
        assert_eq!(rag.indexed_chunks().await, 5000);
        assert_eq!(*provider.batches.lock().unwrap(), vec![2048, 2048, 904]);
    }

    #[tokio::test]
    async fn failed_batch_leaves_index_untouched() {
        let provider = Arc::new(RecordingProvider {
            fail_on_call: Some(2),
            ..RecordingProvider::default()
        });
        let rag = RagService::new(provider.clone(), single_char_chunks());

        let err = rag.process_text(&"x".repeat(3000)).await.unwrap_err();
        assert!(matches!(err, PlanoraError::Http(_)));
        assert_eq!(rag.indexed_chunks().await, 0);
        assert_eq!(*provider.batches.lock().unwrap(), vec![2048, 952]);
    }

    #[test]
    fn chunks_are_fixed_size_without_overlap() {
        let text = "a".repeat(1200);
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[2].len(), 200);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunking_counts_characters_not_bytes() {
        let text = "é".repeat(7);
        let chunks = chunk_text(&text, 3);
        assert_eq!(chunks, vec!["ééé", "ééé", "é"]);
        assert!(chunk_text("", 500).is_empty());
    }

    #[test]
    fn answer_prompt_embeds_context_and_question() {
        let prompt = build_answer_prompt("chunk one\n\nchunk two", "What is a vector?");
        assert!(prompt.contains("Answer the question ONLY from the provided context."));
        assert!(prompt.contains("say \"Answer not found in provided material.\""));
        assert!(prompt.contains("Context:\nchunk one\n\nchunk two\n"));
        assert!(prompt.trim_end().ends_with("Question:\nWhat is a vector?"));
    }

    #[test]
    fn pdf_pages_are_joined_in_order() {
        let text = extract_text_from_pdf(include_bytes!("../../tests/fixtures/optics.pdf")).unwrap();
        let first = text.find("Refraction").unwrap();
        let second = text.find("Diffraction").unwrap();
        assert!(first < second);
        assert!(!text.contains('\u{c}'));
    }

    #[test]
    fn garbage_bytes_are_not_a_pdf() {
        let err = extract_text_from_pdf(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, PlanoraError::Validation(_)));
    }
}
