//! In-process provider answering from a rule table
//!
//! Rules match on a substring of the system context or prompt and are
//! checked in insertion order. Useful for tests and offline demos; the
//! selector never picks it.

use std::sync::Mutex;
use async_trait::async_trait;
use log::debug;

use crate::error::{Error, Result};
use crate::request::{
  HealthReport, HealthStatus, ProviderIdentity, SamplingOverrides
};

const BACKEND: &str = "scripted";

enum Reply
{   Text(String)
  , Fail(String)
}

struct Rule
{   needle: String
  , reply: Reply
}

pub struct ScriptedProvider
{   rules: Vec<Rule>
  , fallback: Reply
  , prompts: Mutex<Vec<String>>
}

impl ScriptedProvider
{   /// Provider with no rules; unmatched prompts fail
    pub fn new() -> Self
    {   ScriptedProvider
        {   rules: Vec::new()
          , fallback: Reply::Fail("no scripted reply".to_string())
          , prompts: Mutex::new(Vec::new())
        }
    }

    /// Provider whose every call fails with `cause`
    pub fn failing(cause: &str) -> Self
    {   let mut provider = Self::new();
        provider.fallback = Reply::Fail(cause.to_string());
        provider
    }

    /// Answer `reply` when the framed prompt contains `needle`
    pub fn on(mut self, needle: &str, reply: &str) -> Self
    {   self.rules.push(Rule
        {   needle: needle.to_string()
          , reply: Reply::Text(reply.to_string())
        });
        self
    }

    /// Fail with `cause` when the framed prompt contains `needle`
    pub fn fail_on(mut self, needle: &str, cause: &str) -> Self
    {   self.rules.push(Rule
        {   needle: needle.to_string()
          , reply: Reply::Fail(cause.to_string())
        });
        self
    }

    /// Answer `reply` to anything no rule matches
    pub fn otherwise(mut self, reply: &str) -> Self
    {   self.fallback = Reply::Text(reply.to_string());
        self
    }

    /// Every prompt seen so far, in call order
    pub fn prompts(&self) -> Vec<String>
    {   self.prompts
          .lock()
          .map(|p| p.clone())
          .unwrap_or_default()
    }
}

impl Default for ScriptedProvider
{   fn default() -> Self
    {   Self::new()
    }
}

#[async_trait]
impl super::Provider for ScriptedProvider
{   fn identity(&self) -> ProviderIdentity
    {   ProviderIdentity
        {   backend: BACKEND.to_string()
          , model: "rules".to_string()
        }
    }

    async fn generate(
      &self
    , prompt: &str
    , _overrides: &SamplingOverrides
    ) -> Result<String>
    {   if let Ok(mut seen) = self.prompts.lock()
        {   seen.push(prompt.to_string());
        }
        let reply = self.rules
          .iter()
          .find(|r| prompt.contains(&r.needle))
          .map(|r| &r.reply)
          .unwrap_or(&self.fallback);
        match reply
        {   Reply::Text(text) => {
              debug!("Scripted reply of {} chars", text.len());
              Ok(text.clone())
            }
          , Reply::Fail(cause) => Err(Error::generation(BACKEND, cause))
        }
    }

    async fn health_check(&self) -> HealthReport
    {   let identity = self.identity();
        match self.fallback
        {   Reply::Fail(ref cause) if self.rules.is_empty() => {
              HealthReport::failed(&identity, HealthStatus::Unhealthy, cause)
            }
          , _ => HealthReport::healthy(&identity)
        }
    }
}
