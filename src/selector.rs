//! Backend selection and the live provider slot

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use log::{debug, error, info, warn};

use crate::config::{BackendKind, BackendMode, ParkwiseConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::providers::{self, gpu_batch, Provider};

/// Ordered backends still to try in auto mode
#[derive(Debug, Clone)]
pub struct CandidateSequence
{   candidates: Vec<BackendKind>
  , current_index: usize
}

impl CandidateSequence
{   pub fn new(candidates: Vec<BackendKind>) -> Self
    {   debug!(
          "Creating candidate sequence with {} backends",
          candidates.len()
        );
        CandidateSequence
        {   candidates
          , current_index: 0
        }
    }

    pub fn current(&self) -> Option<BackendKind>
    {   self.candidates.get(self.current_index).copied()
    }

    /// Move to the next backend
    pub fn next(&mut self) -> Option<BackendKind>
    {   self.current_index += 1;
        self.current()
    }

    pub fn has_next(&self) -> bool
    {   self.current_index + 1 < self.candidates.len()
    }
}

/// A constructed backend, the kind it was built as and the settings
/// it was built from. Providers installed by hand carry no settings.
#[derive(Clone)]
pub struct Selected
{   pub kind: BackendKind
  , pub provider: Arc<dyn Provider>
  , pub settings: Option<ProviderConfig>
}

impl Selected
{   fn connected(settings: ProviderConfig, provider: Arc<dyn Provider>) -> Self
    {   Selected
        {   kind: settings.kind()
          , provider
          , settings: Some(settings)
        }
    }
}

/// Picks and constructs the backend for one configuration
pub struct ProviderSelector
{   config: ParkwiseConfig
}

impl ProviderSelector
{   pub fn new(config: ParkwiseConfig) -> Self
    {   ProviderSelector { config }
    }

    /// Backends auto mode will try, in order
    pub fn auto_candidates(&self) -> Vec<BackendKind>
    {   let mut kinds = Vec::new();
        if self.config.api.is_configured()
        {   kinds.push(BackendKind::Api);
        } else
        {   info!("No API endpoint or key configured, skipping api");
        }
        if gpu_batch::accelerator_available(&self.config.gpu_batch)
        {   kinds.push(BackendKind::GpuBatch);
        } else
        {   info!("No accelerator detected, skipping vllm");
        }
        kinds.push(BackendKind::CpuLocal);
        kinds
    }

    /// Construct the backend for the configured mode. An explicit
    /// mode that fails is fatal; auto mode moves on to the next
    /// candidate and only fails once every candidate has.
    pub async fn select(&self) -> Result<Selected>
    {   match self.config.mode
        {   BackendMode::Explicit(kind) => self.select_explicit(kind).await
          , BackendMode::Auto => self.select_auto().await
        }
    }

    async fn select_explicit(&self, kind: BackendKind) -> Result<Selected>
    {   info!("Using explicitly requested backend {}", kind);
        let settings = self.config.provider_config(kind);
        match providers::connect(&settings).await
        {   Ok(provider) => Ok(Selected::connected(settings, provider))
          , Err(e) => {
              error!("Requested backend {} failed: {}", kind, e);
              Err(Error::ProviderInit
              {   backend: kind.to_string()
                , cause: e.to_string()
              })
            }
        }
    }

    async fn select_auto(&self) -> Result<Selected>
    {   let mut sequence = CandidateSequence::new(self.auto_candidates());
        let mut failures = Vec::new();
        let mut candidate = sequence.current();

        while let Some(kind) = candidate
        {   debug!("Trying backend {}", kind);
            let settings = self.config.provider_config(kind);
            match providers::connect(&settings).await
            {   Ok(provider) => {
                  info!("Auto-selected backend {}", kind);
                  return Ok(Selected::connected(settings, provider));
                }
              , Err(e) => {
                  if sequence.has_next()
                  {   warn!("Backend {} failed: {}; trying next", kind, e);
                  } else
                  {   warn!("Backend {} failed: {}", kind, e);
                  }
                  failures.push(format!("{}: {}", kind, e));
                }
            }
            candidate = sequence.next();
        }

        error!("No backend could be initialized");
        Err(Error::ProviderUnavailable(failures.join("; ")))
    }
}

/// Effective configuration of the live backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveConfig
{   /// Mode as configured: `auto`, `api`, `vllm` or `llamacpp`
    pub requested_mode: String
  , /// Backend actually serving, if any
    pub backend: Option<String>
  , pub model: Option<String>
  , /// Settings of the serving backend, secrets masked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<ProviderConfig>
}

/// Result of a reload attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadOutcome
{   pub success: bool
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

struct Slot
{   config: ParkwiseConfig
  , active: Option<Selected>
}

/// Holds the single live provider. Requests take an `Arc` snapshot;
/// reload builds the replacement outside the lock and swaps it in.
pub struct ProviderRegistry
{   slot: RwLock<Slot>
}

impl ProviderRegistry
{   /// Empty registry; call [`ProviderRegistry::initialize`] next
    pub fn new(config: ParkwiseConfig) -> Self
    {   ProviderRegistry
        {   slot: RwLock::new(Slot
            {   config
              , active: None
            })
        }
    }

    /// Select a backend for the stored configuration
    pub async fn initialize(&self) -> Result<BackendKind>
    {   let config = self.slot.read().await.config.clone();
        let selected = ProviderSelector::new(config).select().await?;
        let kind = selected.kind;
        self.slot.write().await.active = Some(selected);
        Ok(kind)
    }

    /// Select again under `config`. On failure the previous provider
    /// stays live and the previous configuration is kept.
    pub async fn reload(&self, config: ParkwiseConfig) -> ReloadOutcome
    {   info!("Reloading provider");
        match ProviderSelector::new(config.clone()).select().await
        {   Ok(selected) => {
              let kind = selected.kind;
              let mut slot = self.slot.write().await;
              slot.config = config;
              slot.active = Some(selected);
              drop(slot);
              info!("Reloaded with backend {}", kind);
              ReloadOutcome
              {   success: true
                , mode: Some(kind.to_string())
                , message: Some(format!("Reloaded with {} mode", kind))
                , error: None
              }
            }
          , Err(e) => {
              error!("Reload failed, keeping current provider: {}", e);
              ReloadOutcome
              {   success: false
                , mode: None
                , message: None
                , error: Some(e.to_string())
              }
            }
        }
    }

    /// Snapshot of the live provider
    pub async fn current(&self) -> Option<Arc<dyn Provider>>
    {   self.slot
          .read()
          .await
          .active
          .as_ref()
          .map(|s| s.provider.clone())
    }

    pub async fn current_kind(&self) -> Option<BackendKind>
    {   self.slot.read().await.active.as_ref().map(|s| s.kind)
    }

    /// Kind and provider taken under one read, so both belong to the
    /// same backend even while a reload is swapping
    pub async fn snapshot(&self) -> Option<Selected>
    {   self.slot.read().await.active.clone()
    }

    /// Put an already constructed provider live. It reports no
    /// settings since it was not built from the stored configuration.
    pub async fn install(&self, kind: BackendKind, provider: Arc<dyn Provider>)
    {   debug!("Installing {} provider", provider.identity().backend);
        self.slot.write().await.active = Some(Selected
        {   kind
          , provider
          , settings: None
        });
    }

    pub async fn active_config(&self) -> ActiveConfig
    {   let slot = self.slot.read().await;
        let requested_mode = match slot.config.mode
        {   BackendMode::Auto => "auto".to_string()
          , BackendMode::Explicit(kind) => kind.to_string()
        };
        match &slot.active
        {   Some(selected) => {
              let identity = selected.provider.identity();
              ActiveConfig
              {   requested_mode
                , backend: Some(selected.kind.to_string())
                , model: Some(identity.model)
                , settings: selected.settings.clone().map(masked)
              }
            }
          , None => ActiveConfig
            {   requested_mode
              , backend: None
              , model: None
              , settings: None
            }
        }
    }
}

fn masked(config: ProviderConfig) -> ProviderConfig
{   match config
    {   ProviderConfig::Api(mut api) => {
          api.api_key = api.api_key.map(|_| "***".to_string());
          ProviderConfig::Api(api)
        }
      , other => other
    }
}
