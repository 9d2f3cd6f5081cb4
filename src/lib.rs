pub mod error;
pub mod config;
pub mod request;
pub mod providers;
pub mod selector;
pub mod prompts;
pub mod extract;
pub mod geocode;
pub mod pipeline;
pub mod orchestrator;
pub mod vibe;

use std::collections::BTreeSet;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub use config::{BackendKind, BackendMode, ParkwiseConfig};
pub use error::{Error, Result};
pub use orchestrator::SearchOrchestrator;
pub use providers::Provider;
pub use selector::{ProviderRegistry, ProviderSelector};

/*

parkwise-nl turns free-text parking searches into structured filters.

  query ──► parse intent ──► extract entities ──► map filters ──► validate
               (LLM)            (LLM + time         (geocode +       (explanation,
                                 rules)              synonyms)        location check)

One provider is live at a time; it is picked by the selector
(api → vllm → llamacpp) and swapped atomically on reload.

*/

/// Search radius used whenever nothing upstream sets one
pub const DEFAULT_RADIUS_M: u32 = 1000;

// ===== Inbound =====

/// A latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates
{   pub lat: f64
  , pub lng: f64
}

/// One free-text search from a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery
{   pub query: String
  , #[serde(default)]
    pub user_location: Option<Coordinates>
  , #[serde(default)]
    pub language: Option<String>
}

impl SearchQuery
{   pub fn new(query: impl Into<String>) -> Self
    {   SearchQuery
        {   query: query.into()
          , user_location: None
          , language: None
        }
    }

    pub fn with_location(mut self, lat: f64, lng: f64) -> Self
    {   self.user_location = Some(Coordinates { lat, lng });
        self
    }

    pub fn with_language(mut self, language: impl Into<String>)
      -> Self
    {   self.language = Some(language.into());
        self
    }
}

// ===== Pipeline output =====

/// What the user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType
{   FindParking
  , CheckAvailability
  , GetDirections
  , PriceInquiry
  , FeatureInquiry
}

impl IntentType
{   /// Parse a model-supplied label; unknown labels yield `None`
    pub fn from_label(label: &str) -> Option<Self>
    {   match label.trim().to_lowercase().as_str()
        {   "find_parking" => Some(IntentType::FindParking)
          , "check_availability" => Some(IntentType::CheckAvailability)
          , "get_directions" => Some(IntentType::GetDirections)
          , "price_inquiry" => Some(IntentType::PriceInquiry)
          , "feature_inquiry" => Some(IntentType::FeatureInquiry)
          , _ => None
        }
    }

    /// Opening words of the human-readable explanation
    pub fn search_phrase(&self) -> &'static str
    {   match self
        {   IntentType::FindParking => "Searching for parking spots"
          , IntentType::CheckAvailability => {
              "Checking parking availability"
            }
          , IntentType::GetDirections => "Finding directions to parking"
          , IntentType::PriceInquiry => "Looking up parking prices"
          , IntentType::FeatureInquiry => "Looking up parking features"
        }
    }
}

/// Intent classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent
{   pub intent_type: IntentType
  , /// Always within [0, 1]
    pub confidence: f32
  , #[serde(default)]
    pub reasoning: String
}

impl Intent
{   /// Intent recorded when classification fails
    pub fn error_fallback() -> Self
    {   Intent
        {   intent_type: IntentType::FindParking
          , confidence: 0.5
          , reasoning: "error fallback".to_string()
        }
    }
}

impl Default for Intent
{   fn default() -> Self
    {   Intent
        {   intent_type: IntentType::FindParking
          , confidence: 0.0
          , reasoning: String::new()
        }
    }
}

/// Structured fields pulled out of the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entities
{   pub location: Option<String>
  , /// Canonical feature tags; order is not significant
    pub features: BTreeSet<String>
  , pub max_price: Option<f64>
  , pub min_price: Option<f64>
  , /// Meters
    pub radius: Option<u32>
  , pub time_start: Option<NaiveDateTime>
  , /// Only set when both `time_start` and `duration` are
    pub time_end: Option<NaiveDateTime>
  , /// Minutes
    pub duration: Option<u32>
}

impl Default for Entities
{   fn default() -> Self
    {   Entities
        {   location: None
          , features: BTreeSet::new()
          , max_price: None
          , min_price: None
          , radius: Some(DEFAULT_RADIUS_M)
          , time_start: None
          , time_end: None
          , duration: None
        }
    }
}

/// Search filters consumed by the parking search API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filters
{   #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>
  , pub radius: u32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>
  , pub features: Vec<String>
  , pub available: bool
  , /// ISO8601
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>
  , /// ISO8601
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>
}

impl Filters
{   pub fn coordinates(&self) -> Option<Coordinates>
    {   match (self.lat, self.lng)
        {   (Some(lat), Some(lng)) => Some(Coordinates { lat, lng })
          , _ => None
        }
    }
}

impl Default for Filters
{   fn default() -> Self
    {   Filters
        {   lat: None
          , lng: None
          , radius: DEFAULT_RADIUS_M
          , max_price: None
          , min_price: None
          , features: Vec::new()
          , available: true
          , start_time: None
          , end_time: None
        }
    }
}

/// Everything returned for one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSearchResponse
{   pub success: bool
  , pub original_query: String
  , pub intent: Intent
  , pub entities: Entities
  , pub filters: Filters
  , pub explanation: String
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

impl ParsedSearchResponse
{   /// Uniform payload for a run that never reached the pipeline
    pub fn failure(query: &str, error: &Error) -> Self
    {   ParsedSearchResponse
        {   success: false
          , original_query: query.to_string()
          , intent: Intent::default()
          , entities: Entities::default()
          , filters: Filters::default()
          , explanation: String::new()
          , error: Some(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn test_filters_default_radius_and_availability()
    {   let filters = Filters::default();
        assert_eq!(filters.radius, 1000);
        assert!(filters.available);
        assert!(filters.coordinates().is_none());
    }

    #[test]
    fn test_intent_labels()
    {   assert_eq!(
          IntentType::from_label(" Price_Inquiry "),
          Some(IntentType::PriceInquiry)
        );
        assert_eq!(IntentType::from_label("book_spot"), None);
        let json = serde_json::to_value(Intent::error_fallback())
          .unwrap();
        assert_eq!(json["intent_type"], "find_parking");
        assert_eq!(json["confidence"], 0.5);
    }

    #[test]
    fn test_search_query_accepts_missing_optionals()
    {   let query: SearchQuery
          = serde_json::from_str(r#"{"query": "parking"}"#).unwrap();
        assert_eq!(query, SearchQuery::new("parking"));
    }

    #[test]
    fn test_failure_payload_is_unsuccessful()
    {   let response = ParsedSearchResponse::failure(
          "parking",
          &Error::ProviderUnavailable("not initialized".into())
        );
        assert!(!response.success);
        assert_eq!(response.filters.radius, DEFAULT_RADIUS_M);
        assert!(response.error.unwrap().contains("No LLM provider"));
    }
}
