//! vLLM backend on a local accelerator
//!
//! Single `generate` calls are queued to a batching task which gathers
//! whatever else arrives within a short window and sends one
//! `/completions` call per group of identical sampling parameters.
//! `generate_batch` skips the queue for callers that already hold a
//! list of prompts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use log::{debug, trace, error, info, warn};

use crate::config::{BackendKind, GpuBatchConfig, SamplingParams};
use crate::error::{Error, Result};
use crate::prompts::PromptTemplate;
use crate::request::{
  HealthReport, HealthStatus, ProviderIdentity, SamplingOverrides
};

const BACKEND: &str = "vllm";

/// Device nodes that indicate a usable accelerator
const ACCELERATOR_MARKERS: &[&str] = &[
  "/dev/nvidia0"
, "/proc/driver/nvidia/version"
, "/dev/kfd"
];

// ===== Wire Types =====

#[derive(Debug, Clone, Serialize)]
pub struct BatchCompletionRequest
{   pub model: String
  , pub prompt: Vec<String>
  , pub max_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
  , pub top_k: u32
  , #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCompletionResponse
{   pub choices: Vec<BatchChoice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchChoice
{   pub index: usize
  , pub text: String
}

#[derive(Debug, Clone, Deserialize)]
struct ServedModels
{   data: Vec<ServedModel>
}

#[derive(Debug, Clone, Deserialize)]
struct ServedModel
{   id: String
}

// ===== Batcher Actor =====

/// Commands for the batching task
pub enum BatchCommand
{   Generate
    {   prompt: String
      , overrides: SamplingOverrides
      , reply: oneshot::Sender<Result<String>>
    }
}

/// HTTP side shared by the provider and the batching task
struct BatchClient
{   http_client: reqwest::Client
  , endpoint: String
  , model: String
  , sampling: SamplingParams
}

impl BatchClient
{   async fn served_models(&self) -> Result<Vec<String>>
    {   let response = self.http_client
          .get(format!("{}/models", self.endpoint))
          .send()
          .await?;
        if !response.status().is_success()
        {   return Err(Error::ApiError(
              format!("model listing returned {}", response.status())
            ));
        }
        let served: ServedModels = response.json().await
          .map_err(|e| Error::ParseError(e.to_string()))?;
        Ok(served.data.into_iter().map(|m| m.id).collect())
    }

    /// One `/completions` call; results come back in input order
    async fn complete_batch(
      &self
    , prompts: Vec<String>
    , overrides: &SamplingOverrides
    ) -> Result<Vec<String>>
    {   let expected = prompts.len();
        let sampling = overrides.resolve(&self.sampling);
        let request = BatchCompletionRequest
        {   model: self.model.clone()
          , prompt: prompts
          , max_tokens: sampling.max_tokens
          , temperature: sampling.temperature
          , top_p: sampling.top_p
          , top_k: sampling.top_k
          , stop: overrides.stop.clone()
        };
        trace!("vLLM batch of {} prompts", expected);

        let response = self.http_client
          .post(format!("{}/completions", self.endpoint))
          .json(&request)
          .send()
          .await
          .map_err(|e| {
            error!("vLLM HTTP error: {}", e);
            Error::from(e)
          })?;

        let status = response.status();
        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            error!("vLLM error: {}", error_text);
            return Err(Error::ApiError(
              format!("{} {}", status.as_u16(), error_text)
            ));
        }

        let completion: BatchCompletionResponse = response.json().await
          .map_err(|e| Error::ParseError(e.to_string()))?;
        order_choices(completion.choices, expected)
    }
}

/// Put choices back in prompt order, rejecting gaps
fn order_choices(
  mut choices: Vec<BatchChoice>
, expected: usize
) -> Result<Vec<String>>
{   choices.sort_by_key(|c| c.index);
    let in_order = choices
      .iter()
      .enumerate()
      .all(|(i, c)| c.index == i);
    if choices.len() != expected || !in_order
    {   return Err(Error::ParseError(format!(
          "expected {} choices, got {}",
          expected,
          choices.len()
        )));
    }
    Ok(choices.into_iter().map(|c| c.text).collect())
}

/// Main batching loop
///
/// Waits for one command, then keeps collecting until the window
/// closes or the batch is full. Dispatch is spawned so the loop goes
/// straight back to queueing.
async fn run_batch_loop(
  mut cmd_rx: mpsc::UnboundedReceiver<BatchCommand>
, client: Arc<BatchClient>
, max_batch_size: usize
, window: Duration
)
{   debug!("Starting vLLM batch loop");
    while let Some(first) = cmd_rx.recv().await
    {   let mut pending = vec![first];
        let deadline = tokio::time::Instant::now() + window;
        while pending.len() < max_batch_size
        { match tokio::time::timeout_at(deadline, cmd_rx.recv()).await
          {   Ok(Some(cmd)) => pending.push(cmd)
            , Ok(None) | Err(_) => break
          }
        }

        for (overrides, group) in group_by_overrides(pending)
        {   debug!("Dispatching vLLM batch of {}", group.len());
            let client = client.clone();
            tokio::spawn(async move {
              dispatch_group(client, overrides, group).await
            });
        }
    }
    info!("vLLM batch loop shutting down");
}

type Pending = (String, oneshot::Sender<Result<String>>);

fn group_by_overrides(
  commands: Vec<BatchCommand>
) -> Vec<(SamplingOverrides, Vec<Pending>)>
{   let mut groups: Vec<(SamplingOverrides, Vec<Pending>)> = Vec::new();
    for BatchCommand::Generate { prompt, overrides, reply } in commands
    {   match groups.iter_mut().find(|(o, _)| *o == overrides)
        {   Some((_, group)) => group.push((prompt, reply))
          , None => groups.push((overrides, vec![(prompt, reply)]))
        }
    }
    groups
}

async fn dispatch_group(
  client: Arc<BatchClient>
, overrides: SamplingOverrides
, group: Vec<Pending>
)
{   let (prompts, replies): (Vec<String>, Vec<_>)
      = group.into_iter().unzip();
    match client.complete_batch(prompts, &overrides).await
    {   Ok(texts) => {
          for (reply, text) in replies.into_iter().zip(texts)
          {   let _ = reply.send(Ok(text));
          }
        }
      , Err(e) => {
          for reply in replies
          {   let _ = reply.send(Err(e.clone()));
          }
        }
    }
}

// ===== Provider =====

/// Whether a local accelerator can be used
pub fn accelerator_available(config: &GpuBatchConfig) -> bool
{   config.assume_accelerator.unwrap_or_else(|| {
      ACCELERATOR_MARKERS.iter().any(|p| Path::new(p).exists())
    })
}

/// Configured model if served, else the fallback if served
fn choose_model(
  config: &GpuBatchConfig
, served: &[String]
) -> Result<String>
{   if served.iter().any(|m| *m == config.model)
    {   return Ok(config.model.clone());
    }
    if let Some(fallback) = &config.fallback_model
    {   if served.iter().any(|m| m == fallback)
        {   warn!(
              "{} is not served, falling back to {}",
              config.model, fallback
            );
            return Ok(fallback.clone());
        }
    }
    Err(Error::ModelNotFound(config.model.clone()))
}

/// vLLM provider with request batching
pub struct GpuBatchProvider
{   tx: mpsc::UnboundedSender<BatchCommand>
  , client: Arc<BatchClient>
  , config: GpuBatchConfig
  , template: PromptTemplate
  , _task: tokio::task::JoinHandle<()>
}

impl GpuBatchProvider
{   /// Check for an accelerator, resolve the served model and start
    /// the batching task
    pub async fn connect(config: GpuBatchConfig) -> Result<Self>
    {   if !accelerator_available(&config)
        {   return Err(Error::AcceleratorNotFound);
        }
        let http_client = reqwest::Client::builder()
          .timeout(Duration::from_secs(config.timeout_secs))
          .build()
          .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let mut client = BatchClient
        {   http_client
          , endpoint
          , model: config.model.clone()
          , sampling: config.sampling.clone()
        };
        let served = client.served_models().await?;
        client.model = choose_model(&config, &served)?;
        info!("vLLM ready at {} with {}", client.endpoint, client.model);

        let client = Arc::new(client);
        let template = PromptTemplate::for_served_model(&client.model);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let _task = tokio::spawn(run_batch_loop(
          cmd_rx,
          client.clone(),
          config.max_batch_size.max(1),
          Duration::from_millis(config.batch_window_ms)
        ));

        Ok(GpuBatchProvider
        {   tx: cmd_tx
          , client
          , config
          , template
          , _task
        })
    }

    /// Generate for several prompts in one call; results match input
    /// order
    pub async fn generate_batch(
      &self
    , prompts: Vec<String>
    , overrides: &SamplingOverrides
    ) -> Result<Vec<String>>
    {   if prompts.is_empty()
        {   return Ok(Vec::new());
        }
        self.client
          .complete_batch(prompts, overrides)
          .await
          .map_err(|e| Error::generation(BACKEND, e))
    }
}

#[async_trait]
impl super::Provider for GpuBatchProvider
{   fn identity(&self) -> ProviderIdentity
    {   ProviderIdentity
        {   backend: BackendKind::GpuBatch.as_str().to_string()
          , model: self.client.model.clone()
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
    {   let (reply, reply_rx) = oneshot::channel();
        self.tx
          .send(BatchCommand::Generate
          {   prompt: prompt.to_string()
            , overrides: overrides.clone()
            , reply
          })
          .map_err(|_| {
            error!("vLLM batch loop disconnected");
            Error::generation(BACKEND, "batch loop stopped")
          })?;

        match reply_rx.await
        {   Ok(result) => result.map_err(|e| Error::generation(BACKEND, e))
          , Err(_) => Err(Error::generation(
              BACKEND, "batch loop dropped the request"
            ))
        }
    }

    async fn health_check(&self) -> HealthReport
    {   let identity = self.identity();
        let probe = SamplingOverrides::default()
          .with_temperature(0.1)
          .with_max_tokens(5);
        let report = match self
          .generate_batch(vec!["Hello".to_string()], &probe)
          .await
        {   Ok(_) => HealthReport::healthy(&identity)
          , Err(e) => {
              HealthReport::failed(&identity, HealthStatus::Unhealthy, e)
            }
        };
        report
          .with_detail("endpoint", self.client.endpoint.clone())
          .with_detail(
            "gpu_memory_utilization",
            self.config.gpu_memory_utilization
          )
          .with_detail("max_model_len", self.config.max_model_len)
          .with_detail("max_batch_size", self.config.max_batch_size)
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::providers::Provider;

    fn config_for(url: &str) -> GpuBatchConfig
    {   GpuBatchConfig
        {   endpoint: url.to_string()
          , assume_accelerator: Some(true)
          , batch_window_ms: 50
          , timeout_secs: 5
          , ..GpuBatchConfig::default()
        }
    }

    async fn served(server: &mut mockito::ServerGuard, ids: &[&str])
      -> mockito::Mock
    {   let data: Vec<_> = ids
          .iter()
          .map(|id| serde_json::json!({"id": id}))
          .collect();
        server
          .mock("GET", "/models")
          .with_status(200)
          .with_body(serde_json::json!({"data": data}).to_string())
          .create_async()
          .await
    }

    #[test]
    fn test_order_choices_restores_prompt_order()
    {   let choices = vec![
          BatchChoice { index: 1, text: "b".into() }
        , BatchChoice { index: 0, text: "a".into() }
        ];
        assert_eq!(order_choices(choices, 2).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_order_choices_rejects_missing_results()
    {   let choices = vec![BatchChoice { index: 1, text: "b".into() }];
        assert!(order_choices(choices, 2).is_err());
    }

    #[tokio::test]
    async fn test_connect_requires_accelerator()
    {   let config = GpuBatchConfig
        {   assume_accelerator: Some(false)
          , ..GpuBatchConfig::default()
        };
        assert!(matches!(
          GpuBatchProvider::connect(config).await,
          Err(Error::AcceleratorNotFound)
        ));
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_served_model()
    {   let mut server = mockito::Server::new_async().await;
        let _models = served(
          &mut server,
          &["mistralai/Mistral-7B-Instruct-v0.2"]
        ).await;

        let provider = GpuBatchProvider::connect(
          config_for(&server.url())
        ).await.unwrap();
        assert_eq!(
          provider.identity().model,
          "mistralai/Mistral-7B-Instruct-v0.2"
        );
        assert_eq!(provider.template(), PromptTemplate::SystemUserTags);
    }

    #[tokio::test]
    async fn test_connect_fails_when_nothing_usable_is_served()
    {   let mut server = mockito::Server::new_async().await;
        let _models = served(&mut server, &["facebook/opt-125m"]).await;

        let result = GpuBatchProvider::connect(
          config_for(&server.url())
        ).await;
        assert!(matches!(result, Err(Error::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn test_generate_batch_returns_input_order()
    {   let mut server = mockito::Server::new_async().await;
        let _models = served(&mut server, &["openai/gpt-oss-20b"]).await;
        let _batch = server
          .mock("POST", "/completions")
          .match_body(mockito::Matcher::PartialJsonString(
            r#"{"prompt": ["one", "two", "three"]}"#.to_string()
          ))
          .with_status(200)
          .with_body(
            r#"{"choices": [
                 {"index": 2, "text": "3"},
                 {"index": 0, "text": "1"},
                 {"index": 1, "text": "2"}
               ]}"#
          )
          .create_async()
          .await;

        let provider = GpuBatchProvider::connect(
          config_for(&server.url())
        ).await.unwrap();
        let texts = provider
          .generate_batch(
            vec!["one".into(), "two".into(), "three".into()],
            &SamplingOverrides::default()
          )
          .await
          .unwrap();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_concurrent_generates_share_one_call()
    {   let mut server = mockito::Server::new_async().await;
        let _models = served(&mut server, &["openai/gpt-oss-20b"]).await;
        let batch = server
          .mock("POST", "/completions")
          .match_body(mockito::Matcher::PartialJsonString(
            r#"{"prompt": ["first", "second"]}"#.to_string()
          ))
          .with_status(200)
          .with_body(
            r#"{"choices": [
                 {"index": 0, "text": "A"},
                 {"index": 1, "text": "B"}
               ]}"#
          )
          .expect(1)
          .create_async()
          .await;

        let provider = GpuBatchProvider::connect(
          config_for(&server.url())
        ).await.unwrap();
        let none = SamplingOverrides::default();
        let (a, b) = tokio::join!(
          provider.generate("first", &none),
          provider.generate("second", &none)
        );
        assert_eq!(a.unwrap(), "A");
        assert_eq!(b.unwrap(), "B");
        batch.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_failure_names_backend()
    {   let mut server = mockito::Server::new_async().await;
        let _models = served(&mut server, &["openai/gpt-oss-20b"]).await;
        let _batch = server
          .mock("POST", "/completions")
          .with_status(503)
          .create_async()
          .await;

        let provider = GpuBatchProvider::connect(
          config_for(&server.url())
        ).await.unwrap();
        let err = provider
          .generate("hi", &SamplingOverrides::default())
          .await
          .unwrap_err();
        assert!(
          matches!(err, Error::Generation { ref backend, .. } if backend == "vllm")
        );
        let report = provider.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.available);
    }
}
