//! llama.cpp server backend for CPU-only hosts

use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use log::{debug, trace, error, info, warn};

use crate::config::{BackendKind, CpuLocalConfig};
use crate::error::{Error, Result};
use crate::prompts::PromptTemplate;
use crate::request::{
  HealthReport, HealthStatus, ProviderIdentity, SamplingOverrides
};

const BACKEND: &str = "llamacpp";

#[derive(Debug, Clone, Serialize)]
pub struct LlamaCompletionRequest
{   pub prompt: String
  , pub n_predict: usize
  , pub temperature: f32
  , pub top_p: f32
  , pub top_k: u32
  , #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlamaCompletionResponse
{   pub content: String
}

/// Provider for a llama.cpp server running a local GGUF model
pub struct CpuLocalProvider
{   config: CpuLocalConfig
  , endpoint: String
  , model_name: String
  , template: PromptTemplate
  , http_client: reqwest::Client
  , /// Bounds generations in flight; a CPU model serves few at once
    slots: Semaphore
}

impl CpuLocalProvider
{   /// Check the model file and that the server answers `/health`
    pub async fn connect(config: CpuLocalConfig) -> Result<Self>
    {   if !config.model_path.exists()
        {   warn!(
              "Model file not found: {}",
              config.model_path.display()
            );
            return Err(Error::ModelNotFound(
              config.model_path.display().to_string()
            ));
        }
        let model_name = config.model_path
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_else(|| config.model_path.display().to_string());

        let http_client = reqwest::Client::builder()
          .timeout(Duration::from_secs(config.timeout_secs))
          .build()
          .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let response = http_client
          .get(format!("{}/health", endpoint))
          .send()
          .await
          .map_err(|e| {
            error!("llama.cpp server unreachable: {}", e);
            Error::from(e)
          })?;
        if !response.status().is_success()
        {   return Err(Error::ApiError(format!(
              "llama.cpp health returned {}",
              response.status()
            )));
        }

        info!(
          "llama.cpp ready: model {}, threads {}, context {}",
          model_name, config.threads, config.context_size
        );
        Ok(CpuLocalProvider
        {   template: PromptTemplate::for_model_file(&model_name)
          , slots: Semaphore::new(config.parallel.max(1))
          , config
          , endpoint
          , model_name
          , http_client
        })
    }

    async fn completion(
      &self
    , prompt: &str
    , overrides: &SamplingOverrides
    ) -> Result<String>
    {   let sampling = overrides.resolve(&self.config.sampling);
        let request = LlamaCompletionRequest
        {   prompt: prompt.to_string()
          , n_predict: sampling.max_tokens
          , temperature: sampling.temperature
          , top_p: sampling.top_p
          , top_k: sampling.top_k
          , stop: overrides.stop.clone()
          , stream: false
        };

        let _permit = self.slots
          .acquire()
          .await
          .map_err(|_| Error::Other("generation slots closed".into()))?;
        trace!("llama.cpp request: {} prompt chars", prompt.len());

        let response = self.http_client
          .post(format!("{}/completion", self.endpoint))
          .json(&request)
          .send()
          .await?;

        let status = response.status();
        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::ApiError(
              format!("{} {}", status.as_u16(), error_text)
            ));
        }

        let completion: LlamaCompletionResponse = response.json().await
          .map_err(|e| Error::ParseError(e.to_string()))?;
        debug!("llama.cpp produced {} chars", completion.content.len());
        Ok(completion.content)
    }
}

/// Thread count to suggest for this host, leaving one core free
pub fn recommended_threads() -> usize
{   std::thread::available_parallelism()
      .map(|n| n.get().saturating_sub(1).clamp(1, 8))
      .unwrap_or(4)
}

#[async_trait]
impl super::Provider for CpuLocalProvider
{   fn identity(&self) -> ProviderIdentity
    {   ProviderIdentity
        {   backend: BackendKind::CpuLocal.as_str().to_string()
          , model: self.model_name.clone()
        }
    }

    fn template(&self) -> PromptTemplate
    {   self.template
    }

    async fn generate(
      &self
    , prompt: &str
    , overrides: &SamplingOverrides
    ) -> Result<String>
    {   self.completion(prompt, overrides)
          .await
          .map_err(|e| {
            error!("llama.cpp generation error: {}", e);
            Error::generation(BACKEND, e)
          })
    }

    async fn health_check(&self) -> HealthReport
    {   let identity = self.identity();
        let probe = SamplingOverrides::default()
          .with_temperature(0.1)
          .with_max_tokens(5);
        let report = match self.completion("Hello", &probe).await
        {   Ok(_) => HealthReport::healthy(&identity)
          , Err(e) => {
              HealthReport::failed(&identity, HealthStatus::Unhealthy, e)
            }
        };
        report
          .with_detail("threads", self.config.threads)
          .with_detail("context_size", self.config.context_size)
          .with_detail("recommended_threads", recommended_threads())
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::providers::Provider;
    use std::path::PathBuf;

    fn model_file(dir: &tempfile::TempDir, name: &str) -> PathBuf
    {   let path = dir.path().join(name);
        std::fs::write(&path, b"GGUF").unwrap();
        path
    }

    async fn healthy_server() -> (mockito::ServerGuard, mockito::Mock)
    {   let mut server = mockito::Server::new_async().await;
        let health = server
          .mock("GET", "/health")
          .with_status(200)
          .with_body(r#"{"status": "ok"}"#)
          .create_async()
          .await;
        (server, health)
    }

    #[tokio::test]
    async fn test_connect_requires_model_file()
    {   let config = CpuLocalConfig
        {   model_path: PathBuf::from("/nonexistent/model.gguf")
          , ..CpuLocalConfig::default()
        };
        assert!(matches!(
          CpuLocalProvider::connect(config).await,
          Err(Error::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_instruct_model_uses_inst_framing()
    {   let dir = tempfile::tempdir().unwrap();
        let (mut server, _health) = healthy_server().await;
        let _completion = server
          .mock("POST", "/completion")
          .match_body(mockito::Matcher::PartialJsonString(
            r#"{"prompt": "[INST] <<SYS>>\nsys\n<</SYS>>\n\nhi [/INST]"}"#
              .to_string()
          ))
          .with_status(200)
          .with_body(r#"{"content": "{\"ok\": true}"}"#)
          .create_async()
          .await;

        let provider = CpuLocalProvider::connect(CpuLocalConfig
        {   endpoint: server.url()
          , model_path: model_file(&dir, "mistral-7b-instruct.Q4.gguf")
          , ..CpuLocalConfig::default()
        }).await.unwrap();

        assert_eq!(provider.identity().model, "mistral-7b-instruct.Q4.gguf");
        let text = provider
          .generate_structured("hi", Some("sys"))
          .await
          .unwrap();
        assert_eq!(text, "{\"ok\": true}");
    }

    #[tokio::test]
    async fn test_failed_framing_retries_plain_once()
    {   let dir = tempfile::tempdir().unwrap();
        let (mut server, _health) = healthy_server().await;
        let _framed = server
          .mock("POST", "/completion")
          .match_body(mockito::Matcher::Regex(r"\[INST\]".to_string()))
          .with_status(500)
          .create_async()
          .await;
        let plain = server
          .mock("POST", "/completion")
          .match_body(mockito::Matcher::PartialJsonString(
            r#"{"prompt": "sys\n\nhi"}"#.to_string()
          ))
          .with_status(200)
          .with_body(r#"{"content": "plain answer"}"#)
          .expect(1)
          .create_async()
          .await;

        let provider = CpuLocalProvider::connect(CpuLocalConfig
        {   endpoint: server.url()
          , model_path: model_file(&dir, "llama-2-instruct.gguf")
          , ..CpuLocalConfig::default()
        }).await.unwrap();

        let text = provider
          .generate_structured("hi", Some("sys"))
          .await
          .unwrap();
        assert_eq!(text, "plain answer");
        plain.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_reports_threads()
    {   let dir = tempfile::tempdir().unwrap();
        let (mut server, _health) = healthy_server().await;
        let _completion = server
          .mock("POST", "/completion")
          .with_status(200)
          .with_body(r#"{"content": " Hi"}"#)
          .create_async()
          .await;

        let provider = CpuLocalProvider::connect(CpuLocalConfig
        {   endpoint: server.url()
          , model_path: model_file(&dir, "phi-3-mini.gguf")
          , threads: 4
          , ..CpuLocalConfig::default()
        }).await.unwrap();

        assert_eq!(provider.template(), PromptTemplate::Plain);
        let report = provider.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.details["threads"], 4);
    }
}
