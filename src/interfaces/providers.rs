use async_trait::async_trait;

use crate::error::Result;

/// Seam over the hosted model. Production wires in the OpenAI-compatible
/// provider; tests point that provider at a mock server.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String>;

    /// Returns one vector per input, in input order.
    async fn embed(&self, inputs: Vec<String>, model: Option<&str>) -> Result<Vec<Vec<f32>>>;
}
