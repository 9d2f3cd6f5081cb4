//! Entity extraction stage

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use log::{debug, error, info};

use super::{features, time, RequestState};
use crate::error::{Error, Result};
use crate::extract::{try_extract_json, Extracted};
use crate::prompts;
use crate::providers::Provider;
use crate::request::{GenerationRequest, SamplingOverrides};
use crate::{Entities, DEFAULT_RADIUS_M};

pub async fn extract_entities(
  mut state: RequestState
, provider: &dyn Provider
, now: NaiveDateTime
) -> RequestState
{   let prompt = prompts::entity_prompt(
      &state.query,
      state.user_location.as_ref()
    );
    let request = GenerationRequest::new(prompt.user)
      .with_system(prompt.system)
      .with_overrides(SamplingOverrides::default().with_temperature(0.0));

    let decoded = match provider.complete(&request).await
    {   Ok(result) => decode_entities(&result.text, now)
      , Err(e) => Err(e)
    };
    match decoded
    {   Ok(entities) => {
          info!(
            "Extracted entities: location {:?}, {} features",
            entities.location,
            entities.features.len()
          );
          state.entities = entities;
        }
      , Err(e) => {
          error!("Entity extraction failed: {}", e);
          state.entities = Entities::default();
          state.record_error(&e);
        }
    }
    state
}

/// Build [`Entities`] from raw model output, resolving time
/// expressions against `now`
pub fn decode_entities(text: &str, now: NaiveDateTime) -> Result<Entities>
{   let object = match try_extract_json(text)
    {   Extracted::Empty => {
          return Err(Error::Decode(
            "no JSON object in entity reply".to_string()
          ));
        }
      , found => found.into_object()
    };

    let expressions = strings(object.get("time_expressions"));
    let time_start = time::resolve_start(&expressions, now);
    let duration = number(object.get("duration_hours"))
      .and_then(time::duration_minutes);
    debug!(
      "Time expressions {:?} resolved to {:?}",
      expressions, time_start
    );

    Ok(Entities
    {   location: object
          .get("location")
          .and_then(Value::as_str)
          .map(str::trim)
          .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("null"))
          .map(str::to_string)
      , features: features::normalize_features(
          feature_list(object.get("features"))
        )
      , max_price: number(object.get("max_price"))
      , min_price: number(object.get("min_price"))
      , radius: radius(&object)
      , time_start
      , time_end: time::end_time(time_start, duration)
      , duration
    })
}

/// Absent means the default radius; an explicit null means unset
fn radius(object: &Map<String, Value>) -> Option<u32>
{   match object.get("radius")
    {   None => Some(DEFAULT_RADIUS_M)
      , Some(value) => number(Some(value))
          .map(f64::round)
          .filter(|r| *r >= 1.0 && *r <= f64::from(u32::MAX))
          .map(|r| r as u32)
    }
}

/// A number, or a string holding one such as `"$10"`
fn number(value: Option<&Value>) -> Option<f64>
{   let parsed = match value?
    {   Value::Number(n) => n.as_f64()
      , Value::String(s) => s
          .trim()
          .trim_start_matches('$')
          .trim()
          .parse::<f64>()
          .ok()
      , _ => None
    };
    parsed.filter(|n| n.is_finite())
}

/// A list of strings; a lone string counts as a list of one
fn strings(value: Option<&Value>) -> Vec<String>
{   match value
    {   Some(Value::Array(items)) => items
          .iter()
          .filter_map(Value::as_str)
          .map(str::to_string)
          .collect()
      , Some(Value::String(s)) => vec![s.clone()]
      , _ => Vec::new()
    }
}

/// Feature tags; a lone string may hold several separated by commas
fn feature_list(value: Option<&Value>) -> Vec<String>
{   match value
    {   Some(Value::String(s)) => s
          .split(',')
          .map(str::to_string)
          .collect()
      , other => strings(other)
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::providers::ScriptedProvider;
    use crate::SearchQuery;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime
    {   NaiveDate::from_ymd_opt(2026, 10, 18)
          .unwrap()
          .and_hms_opt(8, 15, 0)
          .unwrap()
    }

    #[test]
    fn test_decode_full_reply()
    {   let entities = decode_entities(r#"```json
          {"location": "Taipei 101", "features": ["Covered", "EV charging"],
           "max_price": "$10", "radius": 500,
           "time_expressions": ["tomorrow 2pm"], "duration_hours": 3}
          ```"#, now()).unwrap();

        assert_eq!(entities.location.as_deref(), Some("Taipei 101"));
        assert!(entities.features.contains("covered"));
        assert!(entities.features.contains("ev_charging"));
        assert_eq!(entities.max_price, Some(10.0));
        assert_eq!(entities.radius, Some(500));
        assert_eq!(entities.duration, Some(180));
        assert_eq!(
          entities.time_end.map(|t| time::to_iso8601(&t)).as_deref(),
          Some("2026-10-19T17:00:00")
        );
    }

    #[test]
    fn test_radius_absent_versus_null()
    {   let absent = decode_entities("{}", now()).unwrap();
        assert_eq!(absent.radius, Some(DEFAULT_RADIUS_M));
        let null = decode_entities(r#"{"radius": null}"#, now()).unwrap();
        assert_eq!(null.radius, None);
    }

    #[test]
    fn test_sub_meter_radius_is_unset()
    {   let tiny = decode_entities(r#"{"radius": 0.4}"#, now()).unwrap();
        assert_eq!(tiny.radius, None);
        let rounded = decode_entities(r#"{"radius": 0.6}"#, now()).unwrap();
        assert_eq!(rounded.radius, Some(1));
        let negative = decode_entities(r#"{"radius": -50}"#, now()).unwrap();
        assert_eq!(negative.radius, None);
    }

    #[test]
    fn test_comma_separated_feature_string()
    {   let entities = decode_entities(
          r#"{"features": "covered, ev charging,"}"#,
          now()
        ).unwrap();
        let features: Vec<&str> = entities
          .features
          .iter()
          .map(String::as_str)
          .collect();
        assert_eq!(features, vec!["covered", "ev_charging"]);
    }

    #[test]
    fn test_duration_without_start_has_no_end()
    {   let entities = decode_entities(
          r#"{"time_expressions": [], "duration_hours": 2}"#,
          now()
        ).unwrap();
        assert_eq!(entities.duration, Some(120));
        assert_eq!(entities.time_start, None);
        assert_eq!(entities.time_end, None);
    }

    #[tokio::test]
    async fn test_failure_resets_entities()
    {   let provider = ScriptedProvider::new().otherwise("no idea");
        let mut state = RequestState::new(&SearchQuery::new("parking"));
        state.entities.location = Some("stale".into());

        let state = extract_entities(state, &provider, now()).await;
        assert_eq!(state.entities, Entities::default());
        assert!(state.error.unwrap().contains("decode"));
    }

    #[tokio::test]
    async fn test_user_position_in_prompt()
    {   let provider = ScriptedProvider::new().otherwise("{}");
        let state = RequestState::new(
          &SearchQuery::new("parking nearby").with_location(25.04, 121.56)
        );
        extract_entities(state, &provider, now()).await;
        assert!(
          provider.prompts()[0]
            .contains("User is currently at: lat=25.04, lng=121.56")
        );
    }
}
