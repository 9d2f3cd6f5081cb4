//! Unified generation request, result and health types

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::config::SamplingParams;

/// Per-call sampling overrides; unset fields use the provider's config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOverrides
{   #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>
  , #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>
}

impl SamplingOverrides
{   pub fn with_temperature(mut self, temperature: f32) -> Self
    {   self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self
    {   self.max_tokens = Some(max_tokens);
        self
    }

    /// Merge onto a provider's configured parameters
    pub fn resolve(&self, base: &SamplingParams) -> SamplingParams
    {   SamplingParams
        {   temperature: self.temperature
              .unwrap_or(base.temperature)
          , max_tokens: self.max_tokens.unwrap_or(base.max_tokens)
          , top_p: self.top_p.unwrap_or(base.top_p)
          , top_k: self.top_k.unwrap_or(base.top_k)
        }
    }
}

/// A prompt with optional instruction context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest
{   pub prompt: String
  , pub system: Option<String>
  , #[serde(default)]
    pub overrides: SamplingOverrides
}

impl GenerationRequest
{   pub fn new(prompt: impl Into<String>) -> Self
    {   GenerationRequest
        {   prompt: prompt.into()
          , system: None
          , overrides: SamplingOverrides::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self
    {   self.system = Some(system.into());
        self
    }

    pub fn with_overrides(
      mut self
    , overrides: SamplingOverrides
    ) -> Self
    {   self.overrides = overrides;
        self
    }
}

/// Which backend and model answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity
{   pub backend: String
  , pub model: String
}

/// Raw generated text. Callers must treat `text` as untrusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult
{   pub text: String
  , pub provider: ProviderIdentity
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus
{   Healthy
  , Degraded
  , Unhealthy
}

/// Status record returned by a provider health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport
{   pub status: HealthStatus
  , pub backend: String
  , pub model: String
  , pub available: bool
  , /// Backend-specific facts (endpoint, threads, memory hints)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

impl HealthReport
{   pub fn healthy(identity: &ProviderIdentity) -> Self
    {   HealthReport
        {   status: HealthStatus::Healthy
          , backend: identity.backend.clone()
          , model: identity.model.clone()
          , available: true
          , details: BTreeMap::new()
          , error: None
        }
    }

    pub fn failed(
      identity: &ProviderIdentity
    , status: HealthStatus
    , error: impl ToString
    ) -> Self
    {   HealthReport
        {   status
          , backend: identity.backend.clone()
          , model: identity.model.clone()
          , available: false
          , details: BTreeMap::new()
          , error: Some(error.to_string())
        }
    }

    pub fn with_detail(
      mut self
    , key: &str
    , value: impl Into<serde_json::Value>
    ) -> Self
    {   self.details.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn test_overrides_resolve_onto_config()
    {   let base = SamplingParams::default();
        let resolved = SamplingOverrides::default()
          .with_temperature(0.0)
          .resolve(&base);
        assert_eq!(resolved.temperature, 0.0);
        assert_eq!(resolved.max_tokens, base.max_tokens);
        assert_eq!(resolved.top_k, base.top_k);
    }

    #[test]
    fn test_health_report_serializes_status_lowercase()
    {   let identity = ProviderIdentity
        {   backend: "llamacpp".to_string()
          , model: "mistral.gguf".to_string()
        };
        let report = HealthReport::healthy(&identity)
          .with_detail("threads", 8);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["details"]["threads"], 8);
        assert!(json.get("error").is_none());
    }
}
