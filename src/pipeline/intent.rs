//! Intent classification stage

use serde_json::{Map, Value};
use log::{error, info, warn};

use super::RequestState;
use crate::error::{Error, Result};
use crate::extract::{try_extract_json, Extracted};
use crate::prompts;
use crate::providers::Provider;
use crate::request::{GenerationRequest, SamplingOverrides};
use crate::{Intent, IntentType};

/// Used when the model omits a confidence
const DEFAULT_CONFIDENCE: f32 = 0.8;

pub async fn parse_intent(
  mut state: RequestState
, provider: &dyn Provider
) -> RequestState
{   match classify(provider, &state.query).await
    {   Ok(intent) => {
          info!(
            "Parsed intent: {:?} ({:.2})",
            intent.intent_type, intent.confidence
          );
          state.intent = intent;
        }
      , Err(e) => {
          error!("Intent parsing failed: {}", e);
          state.intent = Intent::error_fallback();
          state.record_error(&e);
        }
    }
    state
}

async fn classify(provider: &dyn Provider, query: &str) -> Result<Intent>
{   let prompt = prompts::intent_prompt(query);
    let request = GenerationRequest::new(prompt.user)
      .with_system(prompt.system)
      .with_overrides(SamplingOverrides::default().with_temperature(0.0));
    let result = provider.complete(&request).await?;
    decode_intent(&result.text)
}

/// Build an [`Intent`] from raw model output
pub fn decode_intent(text: &str) -> Result<Intent>
{   let object = match try_extract_json(text)
    {   Extracted::Empty => {
          return Err(Error::Decode(
            "no JSON object in intent reply".to_string()
          ));
        }
      , found => found.into_object()
    };
    Ok(Intent
    {   intent_type: intent_type(&object)
      , confidence: object
          .get("confidence")
          .and_then(Value::as_f64)
          .map(|c| c.clamp(0.0, 1.0) as f32)
          .unwrap_or(DEFAULT_CONFIDENCE)
      , reasoning: object
          .get("reasoning")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string()
    })
}

fn intent_type(object: &Map<String, Value>) -> IntentType
{   let label = object
      .get("intent_type")
      .or_else(|| object.get("type"))
      .and_then(Value::as_str);
    match label
    {   Some(label) => IntentType::from_label(label).unwrap_or_else(|| {
          warn!("Unknown intent label '{}', using find_parking", label);
          IntentType::FindParking
        })
      , None => IntentType::FindParking
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::providers::ScriptedProvider;
    use crate::SearchQuery;

    #[test]
    fn test_decode_clamps_and_defaults()
    {   let intent = decode_intent(
          r#"Sure: {"intent_type": "price_inquiry", "confidence": 1.7}"#
        ).unwrap();
        assert_eq!(intent.intent_type, IntentType::PriceInquiry);
        assert_eq!(intent.confidence, 1.0);
        assert_eq!(intent.reasoning, "");

        let intent = decode_intent(r#"{"intent_type": "dance"}"#).unwrap();
        assert_eq!(intent.intent_type, IntentType::FindParking);
        assert_eq!(intent.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_decode_rejects_prose()
    {   assert!(matches!(
          decode_intent("I think they want parking."),
          Err(Error::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_yields_fallback()
    {   let provider = ScriptedProvider::failing("connection refused");
        let state = parse_intent(
          RequestState::new(&SearchQuery::new("parking")),
          &provider
        ).await;
        assert_eq!(state.intent, Intent::error_fallback());
        assert!(state.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_query_reaches_prompt()
    {   let provider = ScriptedProvider::new()
          .on("intent classifier", r#"{"intent_type": "get_directions",
              "confidence": 0.9, "reasoning": "asks how to get there"}"#);
        let state = parse_intent(
          RequestState::new(&SearchQuery::new("how do I get to the lot")),
          &provider
        ).await;
        assert_eq!(state.intent.intent_type, IntentType::GetDirections);
        assert_eq!(state.intent.reasoning, "asks how to get there");
        assert!(state.error.is_none());
        assert!(provider.prompts()[0].contains("Query: how do I get to the lot"));
    }
}
