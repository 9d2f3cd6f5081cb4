use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::{debug, trace, error, info, warn};

use crate::config::{ApiConfig, BackendKind, SamplingParams};
use crate::error::{Error, Result};
use crate::request::{
  HealthReport, HealthStatus, ProviderIdentity, SamplingOverrides
};

const ASSISTANT_SYSTEM_MESSAGE: &str
  = "You are a helpful parking assistant.";

// ===== Message Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

impl ChatMessage
{   fn new(role: &str, content: &str) -> Self
    {   ChatMessage
        {   role: role.to_string()
          , content: content.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub max_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
  , #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse
{   pub choices: Vec<ChatChoice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice
{   pub message: ChatMessage
  , pub finish_reason: Option<String>
}

/// Legacy `/completions` request for servers without chat support
#[derive(Debug, Clone, Serialize)]
pub struct TextCompletionRequest
{   pub model: String
  , pub prompt: String
  , pub max_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
  , #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextCompletionResponse
{   pub choices: Vec<TextChoice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextChoice
{   pub text: String
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse
{   pub data: Vec<ModelData>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelData
{   pub id: String
  , #[serde(default)]
    pub owned_by: Option<String>
}

// ===== Provider =====

/// Any OpenAI-compatible endpoint: OpenAI, Azure, Together, Ollama,
/// or a local vLLM/LM Studio server
pub struct OpenAiCompatProvider
{   config: ApiConfig
  , base_url: String
  , http_client: reqwest::Client
}

impl OpenAiCompatProvider
{   /// Build the client without touching the network
    pub fn new(config: ApiConfig) -> Result<Self>
    {   let base_url = config.effective_base_url();
        debug!("Creating OpenAiCompatProvider for {}", base_url);
        let http_client = reqwest::Client::builder()
          .timeout(Duration::from_secs(config.timeout_secs))
          .build()
          .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        Ok(OpenAiCompatProvider
        {   config
          , base_url
          , http_client
        })
    }

    /// Build the client and verify the endpoint answers
    pub async fn connect(config: ApiConfig) -> Result<Self>
    {   let provider = Self::new(config)?;
        if !provider.has_api_key() && !is_local_endpoint(&provider.base_url)
        {   error!("No API key configured for {}", provider.base_url);
            return Err(Error::MissingApiKey(provider.base_url.clone()));
        }
        match provider.list_models().await
        {   Ok(models) => {
              info!(
                "Connected to {} ({} models listed)",
                provider.base_url,
                models.len()
              );
            }
          , Err(Error::ApiError(msg)) if !is_auth_failure(&msg) => {
              warn!(
                "{} answered but could not list models: {}",
                provider.base_url, msg
              );
            }
          , Err(e) => {
              error!("Endpoint {} unusable: {}", provider.base_url, e);
              return Err(e);
            }
        }
        Ok(provider)
    }

    pub fn base_url(&self) -> &str
    {   &self.base_url
    }

    fn has_api_key(&self) -> bool
    {   self.config
          .api_key
          .as_deref()
          .map(|k| !k.trim().is_empty())
          .unwrap_or(false)
    }

    fn authorize(
      &self
    , builder: reqwest::RequestBuilder
    ) -> reqwest::RequestBuilder
    {   match &self.config.api_key
        {   Some(key) => {
              builder.header("Authorization", format!("Bearer {}", key))
            }
          , None => builder
        }
    }

    /// Model ids served by the endpoint
    pub async fn list_models(&self) -> Result<Vec<String>>
    {   debug!("Listing models at {}", self.base_url);
        let response = self
          .authorize(
            self.http_client.get(format!("{}/models", self.base_url))
          )
          .send()
          .await
          .map_err(|e| {
            error!("Failed to fetch models: {}", e);
            Error::from(e)
          })?;

        let status = response.status();
        trace!("Models response status: {}", status);

        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::ApiError(
              format!("{} {}", status.as_u16(), error_text)
            ));
        }

        let models: ModelsResponse = response.json().await
          .map_err(|e| Error::ParseError(e.to_string()))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    async fn chat(
      &self
    , messages: Vec<ChatMessage>
    , sampling: &SamplingParams
    , stop: &[String]
    ) -> Result<String>
    {   let request = ChatCompletionRequest
        {   model: self.config.model.clone()
          , messages
          , max_tokens: sampling.max_tokens
          , temperature: sampling.temperature
          , top_p: sampling.top_p
          , stop: stop.to_vec()
          , stream: false
        };

        trace!("Chat request: {:?}", request);

        let response = self
          .authorize(
            self.http_client
              .post(format!("{}/chat/completions", self.base_url))
          )
          .header("Content-Type", "application/json")
          .json(&request)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            Error::from(e)
          })?;

        let status = response.status();
        trace!("Chat response status: {}", status);

        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Chat completion error: {}", error_text);
            return Err(Error::ApiError(
              format!("{} {}", status.as_u16(), error_text)
            ));
        }

        let chat_response: ChatCompletionResponse
          = response.json().await.map_err(|e| {
            error!("Parse error: {}", e);
            Error::ParseError(e.to_string())
          })?;

        chat_response.choices
          .into_iter()
          .next()
          .map(|c| c.message.content)
          .ok_or(Error::NoChoicesInResponse)
    }

    async fn text_completion(
      &self
    , prompt: &str
    , sampling: &SamplingParams
    , stop: &[String]
    ) -> Result<String>
    {   let request = TextCompletionRequest
        {   model: self.config.model.clone()
          , prompt: prompt.to_string()
          , max_tokens: sampling.max_tokens
          , temperature: sampling.temperature
          , top_p: sampling.top_p
          , stop: stop.to_vec()
        };

        let response = self
          .authorize(
            self.http_client
              .post(format!("{}/completions", self.base_url))
          )
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

        let completion: TextCompletionResponse = response.json().await
          .map_err(|e| Error::ParseError(e.to_string()))?;
        completion.choices
          .into_iter()
          .next()
          .map(|c| c.text)
          .ok_or(Error::NoChoicesInResponse)
    }
}

fn is_auth_failure(msg: &str) -> bool
{   msg.starts_with("401") || msg.starts_with("403")
}

#[async_trait]
impl super::Provider for OpenAiCompatProvider
{   fn identity(&self) -> ProviderIdentity
    {   ProviderIdentity
        {   backend: BackendKind::Api.as_str().to_string()
          , model: self.config.model.clone()
        }
    }

    async fn generate(
      &self
    , prompt: &str
    , overrides: &SamplingOverrides
    ) -> Result<String>
    {   let sampling = overrides.resolve(&self.config.sampling);
        let messages = vec![
          ChatMessage::new("system", ASSISTANT_SYSTEM_MESSAGE)
        , ChatMessage::new("user", prompt)
        ];
        match self.chat(messages, &sampling, &overrides.stop).await
        {   Ok(text) => Ok(text)
          , Err(chat_err) => {
              warn!(
                "Chat completion failed ({}), trying legacy completions",
                chat_err
              );
              self.text_completion(prompt, &sampling, &overrides.stop)
                .await
                .map_err(|_| {
                  Error::generation(BackendKind::Api.as_str(), chat_err)
                })
            }
        }
    }

    async fn generate_framed(
      &self
    , system: &str
    , prompt: &str
    , overrides: &SamplingOverrides
    ) -> Result<String>
    {   let sampling = overrides.resolve(&self.config.sampling);
        let messages = vec![
          ChatMessage::new("system", system)
        , ChatMessage::new("user", prompt)
        ];
        self.chat(messages, &sampling, &overrides.stop)
          .await
          .map_err(|e| Error::generation(BackendKind::Api.as_str(), e))
    }

    async fn health_check(&self) -> HealthReport
    {   let identity = self.identity();
        match self.list_models().await
        {   Ok(_) => HealthReport::healthy(&identity)
              .with_detail("endpoint", self.base_url.clone())
          , Err(e) => {
              warn!("Health check failed: {}", e);
              HealthReport::failed(&identity, HealthStatus::Degraded, e)
                .with_detail("endpoint", self.base_url.clone())
            }
        }
    }

    fn framing_is_plain(&self) -> bool
    {   false
    }
}

/// Self-hosted servers on this machine usually run without auth
fn is_local_endpoint(base_url: &str) -> bool
{   match reqwest::Url::parse(base_url)
    {   Ok(url) => matches!(
          url.host_str(),
          Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0")
            | Some("[::1]")
        )
      , Err(_) => false
    }
}
