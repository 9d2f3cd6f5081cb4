//! Search orchestrator
//!
//! Owns the provider registry and the injected capabilities, runs one
//! pipeline per query and answers the service-level operations
//! (health, active configuration, reload, vibe analysis).

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use log::{debug, error, info};

use crate::config::{BackendKind, ParkwiseConfig};
use crate::error::{Error, Result};
use crate::geocode::{Geocoder, LandmarkGeocoder};
use crate::pipeline::{self, Clock, RequestState, RetryPolicy, StageContext};
use crate::request::{HealthReport, HealthStatus};
use crate::selector::{ActiveConfig, ProviderRegistry, ReloadOutcome};
use crate::vibe::{self, VibeReport, VibeRequest};
use crate::{ParsedSearchResponse, SearchQuery};

/// Service-level health, independent of whether a provider is live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth
{   /// `healthy` with a provider, `degraded` without
    pub status: HealthStatus
  , pub mode: Option<String>
  , pub provider_available: bool
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<HealthReport>
}

pub struct SearchOrchestrator
{   registry: ProviderRegistry
  , geocoder: Arc<dyn Geocoder>
  , clock: Clock
  , retry: RetryPolicy
}

impl SearchOrchestrator
{   /// Orchestrator with no live provider, the Taipei landmark table
    /// and the system clock
    pub fn new(config: ParkwiseConfig) -> Self
    {   SearchOrchestrator
        {   registry: ProviderRegistry::new(config)
          , geocoder: Arc::new(LandmarkGeocoder::taipei())
          , clock: pipeline::system_clock()
          , retry: RetryPolicy::default()
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self
    {   self.geocoder = geocoder;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self
    {   self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self
    {   self.retry = retry;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry
    {   &self.registry
    }

    /// Select the startup provider. An error leaves the orchestrator
    /// running degraded.
    pub async fn initialize(&self) -> Result<BackendKind>
    {   match self.registry.initialize().await
        {   Ok(kind) => {
              info!("Initialized with backend {}", kind);
              Ok(kind)
            }
          , Err(e) => {
              error!("Starting without a provider: {}", e);
              Err(e)
            }
        }
    }

    /// Run the full pipeline for one query
    pub async fn process(&self, query: SearchQuery) -> ParsedSearchResponse
    {   let provider = match self.registry.current().await
        {   Some(provider) => provider
          , None => {
              error!("Search attempted without a provider");
              return ParsedSearchResponse::failure(
                &query.query,
                &Error::ProviderUnavailable("not initialized".to_string())
              );
            }
        };

        debug!(
          "Processing '{}' with {}",
          query.query,
          provider.identity().backend
        );
        let ctx = StageContext
        {   provider: provider.as_ref()
          , geocoder: self.geocoder.as_ref()
          , now: (self.clock)()
        };
        let state = pipeline::run(
          RequestState::new(&query),
          &ctx,
          &self.retry
        ).await;

        let response = state.into_response();
        info!(
          "Query processed: success={}, explanation='{}'",
          response.success, response.explanation
        );
        response
    }

    pub async fn health(&self) -> ServiceHealth
    {   match self.registry.snapshot().await
        {   Some(selected) => ServiceHealth
            {   status: HealthStatus::Healthy
              , mode: Some(selected.kind.to_string())
              , provider_available: true
              , provider_status: Some(selected.provider.health_check().await)
            }
          , None => ServiceHealth
            {   status: HealthStatus::Degraded
              , mode: None
              , provider_available: false
              , provider_status: None
            }
        }
    }

    pub async fn active_config(&self) -> ActiveConfig
    {   self.registry.active_config().await
    }

    /// Re-read configuration from the environment and select again
    pub async fn reload(&self) -> ReloadOutcome
    {   match ParkwiseConfig::from_env()
        {   Ok(config) => self.reload_with(config).await
          , Err(e) => {
              error!("Reload aborted, configuration invalid: {}", e);
              ReloadOutcome
              {   success: false
                , mode: None
                , message: None
                , error: Some(e.to_string())
              }
            }
        }
    }

    pub async fn reload_with(&self, config: ParkwiseConfig) -> ReloadOutcome
    {   self.registry.reload(config).await
    }

    pub async fn analyze_vibe(&self, request: &VibeRequest) -> VibeReport
    {   match self.registry.snapshot().await
        {   Some(selected) => {
              let mode = selected.kind.to_string();
              vibe::analyze(selected.provider.as_ref(), request, &mode).await
            }
          , None => VibeReport::failed(
              "none",
              &Error::ProviderUnavailable("not initialized".to_string())
            )
        }
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::providers::ScriptedProvider;

    #[tokio::test]
    async fn test_uninitialized_answers_unavailable()
    {   let orchestrator = SearchOrchestrator::new(ParkwiseConfig::default());
        let response = orchestrator
          .process(SearchQuery::new("parking near Taipei 101"))
          .await;
        assert!(!response.success);
        assert_eq!(response.original_query, "parking near Taipei 101");
        assert!(response.error.unwrap().contains("No LLM provider"));

        let health = orchestrator.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!health.provider_available);
        assert_eq!(health.mode, None);

        let report = orchestrator
          .analyze_vibe(&VibeRequest::new(25.0, 121.5))
          .await;
        assert!(!report.success);
        assert_eq!(report.mode, "none");
    }

    #[tokio::test]
    async fn test_health_includes_provider_report()
    {   let orchestrator = SearchOrchestrator::new(ParkwiseConfig::default());
        orchestrator.registry().install(
          BackendKind::Api,
          Arc::new(ScriptedProvider::new().otherwise("{}"))
        ).await;

        let health = orchestrator.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.mode.as_deref(), Some("api"));
        let report = health.provider_status.unwrap();
        assert_eq!(report.backend, "scripted");
        assert!(report.available);
    }

    #[tokio::test]
    async fn test_vibe_mode_matches_serving_provider()
    {   let orchestrator = SearchOrchestrator::new(ParkwiseConfig::default());
        orchestrator.registry().install(
          BackendKind::CpuLocal,
          Arc::new(ScriptedProvider::new().otherwise("{}"))
        ).await;

        let report = orchestrator
          .analyze_vibe(&VibeRequest::new(25.03, 121.56))
          .await;
        assert!(report.success);
        assert_eq!(report.mode, "llamacpp");
    }

    #[test]
    fn test_health_serializes_lowercase_status()
    {   let health = ServiceHealth
        {   status: HealthStatus::Degraded
          , mode: None
          , provider_available: false
          , provider_status: None
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert!(json.get("provider_status").is_none());
    }
}
