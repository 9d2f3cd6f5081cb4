//! Configuration for parkwise backends and provider selection

use std::path::PathBuf;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use log::debug;

use crate::error::{Error, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_VLLM_ENDPOINT: &str = "http://127.0.0.1:8000/v1";
const DEFAULT_LLAMACPP_ENDPOINT: &str = "http://127.0.0.1:8080";

/// The three interchangeable backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind
{   /// OpenAI-compatible HTTP endpoint (cloud or local)
    #[serde(rename = "api")]
    Api
  , /// vLLM server on a local accelerator
    #[serde(rename = "vllm")]
    GpuBatch
  , /// llama.cpp server on the CPU
    #[serde(rename = "llamacpp")]
    CpuLocal
}

impl BackendKind
{   /// Stable identifier used in logs, errors and health reports
    pub fn as_str(&self) -> &'static str
    {   match self
        {   BackendKind::Api => "api"
          , BackendKind::GpuBatch => "vllm"
          , BackendKind::CpuLocal => "llamacpp"
        }
    }
}

impl std::fmt::Display for BackendKind
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind
{   type Err = Error;

    fn from_str(s: &str) -> Result<Self>
    {   match s.trim().to_lowercase().as_str()
        {   "api" => Ok(BackendKind::Api)
          , "vllm" | "gpu" => Ok(BackendKind::GpuBatch)
          , "llamacpp" | "llama.cpp" | "cpu" => {
              Ok(BackendKind::CpuLocal)
            }
          , other => Err(Error::InvalidConfiguration(
              format!("unknown backend: {}", other)
            ))
        }
    }
}

/// How the selector chooses a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendMode
{   /// Probe api, then vllm, then llamacpp
    Auto
  , /// Use exactly this backend; construction failure is fatal
    Explicit(BackendKind)
}

impl Default for BackendMode
{   fn default() -> Self
    {   BackendMode::Auto
    }
}

impl FromStr for BackendMode
{   type Err = Error;

    fn from_str(s: &str) -> Result<Self>
    {   let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto")
        {   return Ok(BackendMode::Auto);
        }
        s.parse().map(BackendMode::Explicit)
    }
}

/// Sampling parameters shared by every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams
{   pub temperature: f32
  , pub max_tokens: usize
  , pub top_p: f32
  , pub top_k: u32
}

impl Default for SamplingParams
{   fn default() -> Self
    {   SamplingParams
        {   temperature: 0.3
          , max_tokens: 500
          , top_p: 0.9
          , top_k: 40
        }
    }
}

/// OpenAI-compatible endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig
{   /// Endpoint base URL; `None` keeps auto-detect from probing it
    pub base_url: Option<String>
  , /// Bearer credential
    pub api_key: Option<String>
  , pub model: String
  , pub sampling: SamplingParams
  , pub timeout_secs: u64
}

impl ApiConfig
{   /// Base URL to use, falling back to the public OpenAI endpoint
    pub fn effective_base_url(&self) -> String
    {   self.base_url
          .clone()
          .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
          .trim_end_matches('/')
          .to_string()
    }

    /// Whether enough is configured for auto-detect to try this backend
    pub fn is_configured(&self) -> bool
    {   self.base_url
          .as_deref()
          .map(|u| !u.trim().is_empty())
          .unwrap_or(false)
    }
}

impl Default for ApiConfig
{   fn default() -> Self
    {   ApiConfig
        {   base_url: None
          , api_key: None
          , model: "gpt-4-turbo".to_string()
          , sampling: SamplingParams::default()
          , timeout_secs: 30
        }
    }
}

/// vLLM server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuBatchConfig
{   pub endpoint: String
  , pub model: String
  , /// Served model used when `model` is not available
    pub fallback_model: Option<String>
  , pub gpu_memory_utilization: f32
  , pub max_model_len: usize
  , pub sampling: SamplingParams
  , /// Upper bound on prompts sent in one batch call
    pub max_batch_size: usize
  , /// How long the batcher waits for more prompts
    pub batch_window_ms: u64
  , /// Overrides accelerator detection when set
    pub assume_accelerator: Option<bool>
  , pub timeout_secs: u64
}

impl Default for GpuBatchConfig
{   fn default() -> Self
    {   GpuBatchConfig
        {   endpoint: DEFAULT_VLLM_ENDPOINT.to_string()
          , model: "openai/gpt-oss-20b".to_string()
          , fallback_model: Some(
              "mistralai/Mistral-7B-Instruct-v0.2".to_string()
            )
          , gpu_memory_utilization: 0.9
          , max_model_len: 4096
          , sampling: SamplingParams::default()
          , max_batch_size: 16
          , batch_window_ms: 10
          , assume_accelerator: None
          , timeout_secs: 30
        }
    }
}

/// llama.cpp server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuLocalConfig
{   pub endpoint: String
  , /// GGUF file loaded by the server; must exist locally
    pub model_path: PathBuf
  , pub threads: usize
  , pub context_size: usize
  , pub batch_size: usize
  , /// Concurrent generations allowed in flight
    pub parallel: usize
  , pub sampling: SamplingParams
  , pub timeout_secs: u64
}

impl Default for CpuLocalConfig
{   fn default() -> Self
    {   CpuLocalConfig
        {   endpoint: DEFAULT_LLAMACPP_ENDPOINT.to_string()
          , model_path: PathBuf::from(
              "models/mistral-7b-instruct-v0.2.Q4_K_M.gguf"
            )
          , threads: 8
          , context_size: 4096
          , batch_size: 512
          , parallel: 1
          , sampling: SamplingParams::default()
          , timeout_secs: 30
        }
    }
}

/// Configuration handed to exactly one backend constructor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderConfig
{   Api(ApiConfig)
  , GpuBatch(GpuBatchConfig)
  , CpuLocal(CpuLocalConfig)
}

impl ProviderConfig
{   pub fn kind(&self) -> BackendKind
    {   match self
        {   ProviderConfig::Api(_) => BackendKind::Api
          , ProviderConfig::GpuBatch(_) => BackendKind::GpuBatch
          , ProviderConfig::CpuLocal(_) => BackendKind::CpuLocal
        }
    }
}

/// Parkwise configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkwiseConfig
{   pub mode: BackendMode
  , pub api: ApiConfig
  , pub gpu_batch: GpuBatchConfig
  , pub cpu_local: CpuLocalConfig
}

impl ParkwiseConfig
{   /// Load configuration from the process environment
    pub fn from_env() -> Result<Self>
    {   Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
      F: Fn(&str) -> Option<String>
    {   let get = |key: &str| {
          lookup(key).filter(|v| !v.trim().is_empty())
        };
        let timeout_secs = parse_or(&get, "LLM_TIMEOUT_SECS", 30)?;
        let defaults = ParkwiseConfig::default();

        let mode = match get("LLM_MODE")
        {   Some(m) => m.parse::<BackendMode>()?
          , None => BackendMode::Auto
        };

        let api = ApiConfig
        {   base_url: get("API_BASE_URL")
          , api_key: get("API_KEY")
          , model: get("API_MODEL")
              .unwrap_or(defaults.api.model)
          , sampling: SamplingParams
            {   temperature: parse_or(
                  &get, "API_TEMPERATURE", 0.3
                )?
              , max_tokens: parse_or(&get, "API_MAX_TOKENS", 500)?
              , ..SamplingParams::default()
            }
          , timeout_secs
        };

        let gpu_batch = GpuBatchConfig
        {   endpoint: get("VLLM_ENDPOINT")
              .unwrap_or(defaults.gpu_batch.endpoint)
          , model: get("VLLM_MODEL")
              .unwrap_or(defaults.gpu_batch.model)
          , fallback_model: get("VLLM_FALLBACK_MODEL")
              .or(defaults.gpu_batch.fallback_model)
          , gpu_memory_utilization: parse_or(
              &get, "VLLM_GPU_MEMORY", 0.9
            )?
          , max_model_len: parse_or(
              &get, "VLLM_MAX_MODEL_LEN", 4096
            )?
          , sampling: SamplingParams
            {   temperature: parse_or(
                  &get, "VLLM_TEMPERATURE", 0.3
                )?
              , max_tokens: parse_or(&get, "VLLM_MAX_TOKENS", 500)?
              , ..SamplingParams::default()
            }
          , max_batch_size: parse_or(&get, "VLLM_MAX_BATCH", 16)?
          , batch_window_ms: parse_or(
              &get, "VLLM_BATCH_WINDOW_MS", 10
            )?
          , assume_accelerator: match get("VLLM_ASSUME_GPU")
            {   Some(v) => Some(parse_bool("VLLM_ASSUME_GPU", &v)?)
              , None => None
            }
          , timeout_secs
        };

        let cpu_local = CpuLocalConfig
        {   endpoint: get("LLAMACPP_ENDPOINT")
              .unwrap_or(defaults.cpu_local.endpoint)
          , model_path: get("LLAMACPP_MODEL_PATH")
              .map(PathBuf::from)
              .unwrap_or(defaults.cpu_local.model_path)
          , threads: parse_or(&get, "LLAMACPP_THREADS", 8)?
          , context_size: parse_or(
              &get, "LLAMACPP_CONTEXT_SIZE", 4096
            )?
          , batch_size: parse_or(&get, "LLAMACPP_BATCH_SIZE", 512)?
          , parallel: parse_or(&get, "LLAMACPP_PARALLEL", 1)?
          , sampling: SamplingParams
            {   temperature: parse_or(
                  &get, "LLAMACPP_TEMPERATURE", 0.3
                )?
              , max_tokens: parse_or(
                  &get, "LLAMACPP_MAX_TOKENS", 500
                )?
              , ..SamplingParams::default()
            }
          , timeout_secs
        };

        debug!("Loaded configuration with mode {:?}", mode);
        Ok(ParkwiseConfig
        {   mode
          , api
          , gpu_batch
          , cpu_local
        })
    }

    /// Backend-specific configuration for one kind
    pub fn provider_config(&self, kind: BackendKind)
      -> ProviderConfig
    {   match kind
        {   BackendKind::Api => ProviderConfig::Api(self.api.clone())
          , BackendKind::GpuBatch => {
              ProviderConfig::GpuBatch(self.gpu_batch.clone())
            }
          , BackendKind::CpuLocal => {
              ProviderConfig::CpuLocal(self.cpu_local.clone())
            }
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
  T: FromStr
, G: Fn(&str) -> Option<String>
{   match get(key)
    {   Some(raw) => raw.trim().parse().map_err(|_| {
          Error::InvalidConfiguration(
            format!("{} has invalid value: {}", key, raw)
          )
        })
      , None => Ok(default)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool>
{   match raw.trim().to_lowercase().as_str()
    {   "1" | "true" | "yes" | "on" => Ok(true)
      , "0" | "false" | "no" | "off" => Ok(false)
      , _ => Err(Error::InvalidConfiguration(
          format!("{} has invalid value: {}", key, raw)
        ))
    }
}
