//! LLM provider implementations
//!
//! Every backend implements [`Provider`]; the rest of the crate only
//! ever sees `Arc<dyn Provider>`.

pub mod openai_compat;
pub mod gpu_batch;
pub mod cpu_local;
pub mod scripted;

use std::sync::Arc;
use async_trait::async_trait;
use log::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::prompts::{plain_concat, PromptTemplate};
use crate::request::{
  GenerationRequest, GenerationResult, HealthReport, ProviderIdentity
, SamplingOverrides
};

// Re-export for convenience
pub use openai_compat::OpenAiCompatProvider;
pub use gpu_batch::GpuBatchProvider;
pub use cpu_local::CpuLocalProvider;
pub use scripted::ScriptedProvider;

/// Uniform text-generation contract over every backend
#[async_trait]
pub trait Provider: Send + Sync
{   /// Backend and model answering calls
    fn identity(&self) -> ProviderIdentity;

    /// Framing used when system context must be folded into one string
    fn template(&self) -> PromptTemplate
    {   PromptTemplate::Plain
    }

    /// Generate from a single prompt string
    async fn generate(
      &self
    , prompt: &str
    , overrides: &SamplingOverrides
    ) -> Result<String>;

    /// Backend-specific composition of system context and prompt
    async fn generate_framed(
      &self
    , system: &str
    , prompt: &str
    , overrides: &SamplingOverrides
    ) -> Result<String>
    {   let framed = self.template().render(system, prompt);
        self.generate(&framed, overrides).await
    }

    /// Run a request, falling back once to plain concatenation when
    /// the backend-specific framing fails
    async fn complete(
      &self
    , request: &GenerationRequest
    ) -> Result<GenerationResult>
    {   let identity = self.identity();
        let text = match request.system.as_deref()
        {   None => {
              self.generate(&request.prompt, &request.overrides).await?
            }
          , Some(system) => {
              match self
                .generate_framed(system, &request.prompt, &request.overrides)
                .await
              {   Ok(text) => text
                , Err(e) if self.framing_is_plain() => return Err(e)
                , Err(e) => {
                    warn!(
                      "Framed generation failed on {}: {}; \
                       retrying with plain prompt",
                      identity.backend, e
                    );
                    let plain = plain_concat(system, &request.prompt);
                    self.generate(&plain, &request.overrides).await?
                  }
              }
            }
        };
        debug!(
          "{} generated {} chars",
          identity.backend,
          text.len()
        );
        Ok(GenerationResult
        {   text
          , provider: identity
        })
    }

    /// System prompt plus user prompt with default sampling
    async fn generate_structured(
      &self
    , prompt: &str
    , system_prompt: Option<&str>
    ) -> Result<String>
    {   let mut request = GenerationRequest::new(prompt);
        request.system = system_prompt.map(str::to_string);
        self.complete(&request).await.map(|r| r.text)
    }

    /// Probe the backend
    async fn health_check(&self) -> HealthReport;

    /// Whether `generate_framed` already is plain concatenation, in
    /// which case a fallback attempt would repeat the same call
    fn framing_is_plain(&self) -> bool
    {   self.template() == PromptTemplate::Plain
    }
}

/// Construct and probe the backend described by `config`
pub async fn connect(config: &ProviderConfig)
  -> Result<Arc<dyn Provider>>
{   match config
    {   ProviderConfig::Api(c) => {
          Ok(Arc::new(OpenAiCompatProvider::connect(c.clone()).await?))
        }
      , ProviderConfig::GpuBatch(c) => {
          Ok(Arc::new(GpuBatchProvider::connect(c.clone()).await?))
        }
      , ProviderConfig::CpuLocal(c) => {
          Ok(Arc::new(CpuLocalProvider::connect(c.clone()).await?))
        }
    }
}
