//! Request-processing pipeline
//!
//! Stages run strictly in sequence over one [`RequestState`]; each takes
//! the state by value, fills in its own fields and hands it back. Stage
//! failures are recorded on the state and never stop the run.

pub mod intent;
pub mod entities;
pub mod time;
pub mod features;
pub mod filters;
pub mod validate;

use std::sync::Arc;
use chrono::{Local, NaiveDateTime, Timelike};
use log::{debug, info};

use crate::error::Error;
use crate::geocode::Geocoder;
use crate::providers::Provider;
use crate::{
  Coordinates, Entities, Filters, Intent, ParsedSearchResponse
, SearchQuery
};

/// Source of "now" for time-expression resolution
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Local wall-clock time, truncated to whole seconds
pub fn system_clock() -> Clock
{   Arc::new(|| {
      let now = Local::now().naive_local();
      now.with_nanosecond(0).unwrap_or(now)
    })
}

/// A clock that always answers `at`
pub fn fixed_clock(at: NaiveDateTime) -> Clock
{   Arc::new(move || at)
}

/// The unit of work flowing through the stages
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState
{   pub query: String
  , pub user_location: Option<Coordinates>
  , pub language: String
  , pub intent: Intent
  , pub entities: Entities
  , pub filters: Filters
  , pub explanation: String
  , pub error: Option<String>
}

impl RequestState
{   pub fn new(query: &SearchQuery) -> Self
    {   RequestState
        {   query: query.query.clone()
          , user_location: query.user_location
          , language: query.language
              .clone()
              .unwrap_or_else(|| "en".to_string())
          , intent: Intent::default()
          , entities: Entities::default()
          , filters: Filters::default()
          , explanation: String::new()
          , error: None
        }
    }

    /// Record a recoverable failure; the latest one is reported
    pub fn record_error(&mut self, error: &Error)
    {   self.error = Some(error.to_string());
    }

    pub fn into_response(self) -> ParsedSearchResponse
    {   ParsedSearchResponse
        {   success: self.error.is_none()
          , original_query: self.query
          , intent: self.intent
          , entities: self.entities
          , filters: self.filters
          , explanation: self.explanation
          , error: self.error
        }
    }
}

/// Pipeline positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage
{   ParseIntent
  , ExtractEntities
  , MapFilters
  , Validate
  , Done
}

impl Stage
{   /// Fixed successor; `Validate` is decided by the retry policy
    fn next(self) -> Stage
    {   match self
        {   Stage::ParseIntent => Stage::ExtractEntities
          , Stage::ExtractEntities => Stage::MapFilters
          , Stage::MapFilters => Stage::Validate
          , Stage::Validate | Stage::Done => Stage::Done
        }
    }
}

/// Decides whether a validated state goes back to `ParseIntent`.
/// The default never retries.
#[derive(Clone, Copy)]
pub struct RetryPolicy
{   pub max_retries: usize
  , should_retry: fn(&RequestState) -> bool
}

impl RetryPolicy
{   pub fn never() -> Self
    {   RetryPolicy
        {   max_retries: 0
          , should_retry: |_| false
        }
    }

    /// Retry up to `max_retries` times while `should_retry` holds
    pub fn bounded(
      max_retries: usize
    , should_retry: fn(&RequestState) -> bool
    ) -> Self
    {   RetryPolicy
        {   max_retries
          , should_retry
        }
    }

    pub fn after_validate(
      &self
    , state: &RequestState
    , retries_done: usize
    ) -> Stage
    {   if retries_done < self.max_retries && (self.should_retry)(state)
        {   Stage::ParseIntent
        } else
        {   Stage::Done
        }
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   Self::never()
    }
}

impl std::fmt::Debug for RetryPolicy
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.debug_struct("RetryPolicy")
          .field("max_retries", &self.max_retries)
          .finish()
    }
}

/// Capabilities a run needs
pub struct StageContext<'a>
{   pub provider: &'a dyn Provider
  , pub geocoder: &'a dyn Geocoder
  , pub now: NaiveDateTime
}

/// Run every stage in order and return the finished state
pub async fn run(
  mut state: RequestState
, ctx: &StageContext<'_>
, policy: &RetryPolicy
) -> RequestState
{   let mut stage = Stage::ParseIntent;
    let mut retries = 0;
    loop
    {   debug!("Pipeline stage {:?}", stage);
        state = match stage
        {   Stage::ParseIntent => {
              intent::parse_intent(state, ctx.provider).await
            }
          , Stage::ExtractEntities => {
              entities::extract_entities(state, ctx.provider, ctx.now)
                .await
            }
          , Stage::MapFilters => {
              filters::map_filters(state, ctx.geocoder).await
            }
          , Stage::Validate => validate::validate(state)
          , Stage::Done => return state
        };

        stage = match stage
        {   Stage::Validate => {
              let next = policy.after_validate(&state, retries);
              if next == Stage::ParseIntent
              {   retries += 1;
                  info!("Retrying pipeline (attempt {})", retries + 1);
                  state.error = None;
              }
              next
            }
          , other => other.next()
        };
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::geocode::LandmarkGeocoder;
    use crate::providers::ScriptedProvider;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime
    {   NaiveDate::from_ymd_opt(2026, 10, 18)
          .unwrap()
          .and_hms_opt(12, 0, 0)
          .unwrap()
    }

    #[test]
    fn test_default_policy_ends_after_validate()
    {   let state = RequestState::new(&SearchQuery::new("x"));
        assert_eq!(
          RetryPolicy::default().after_validate(&state, 0),
          Stage::Done
        );
    }

    #[test]
    fn test_bounded_policy_stops_at_limit()
    {   let policy = RetryPolicy::bounded(2, |s| s.error.is_some());
        let mut state = RequestState::new(&SearchQuery::new("x"));
        state.error = Some("location".into());
        assert_eq!(policy.after_validate(&state, 1), Stage::ParseIntent);
        assert_eq!(policy.after_validate(&state, 2), Stage::Done);
    }

    #[tokio::test]
    async fn test_bounded_retry_reruns_from_intent()
    {   let provider = ScriptedProvider::failing("offline");
        let geocoder = LandmarkGeocoder::taipei();
        let ctx = StageContext
        {   provider: &provider
          , geocoder: &geocoder
          , now: noon()
        };
        let policy = RetryPolicy::bounded(1, |s| s.error.is_some());

        let state = run(
          RequestState::new(&SearchQuery::new("parking")),
          &ctx,
          &policy
        ).await;
        // two intent and two entity calls
        assert_eq!(provider.prompts().len(), 4);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_default_run_calls_provider_once_per_model_stage()
    {   let provider = ScriptedProvider::new()
          .otherwise(r#"{"intent_type": "find_parking"}"#);
        let geocoder = LandmarkGeocoder::taipei();
        let ctx = StageContext
        {   provider: &provider
          , geocoder: &geocoder
          , now: noon()
        };

        let state = run(
          RequestState::new(
            &SearchQuery::new("parking").with_location(25.0, 121.5)
          ),
          &ctx,
          &RetryPolicy::default()
        ).await;
        assert_eq!(provider.prompts().len(), 2);
        assert!(state.error.is_none());
        assert_eq!(state.filters.lat, Some(25.0));
    }
}
