//! Location check and human-readable explanation

use log::warn;

use super::RequestState;
use crate::error::Error;

pub fn validate(mut state: RequestState) -> RequestState
{   if state.filters.lat.is_none() && state.filters.lng.is_none()
    {   warn!("No location resolved for '{}'", state.query);
        state.record_error(&Error::LocationRequired);
    }
    state.explanation = explain(&state);
    state
}

/// Search type, place, price, features, then start time
pub fn explain(state: &RequestState) -> String
{   let filters = &state.filters;
    let mut parts = vec![state.intent.intent_type.search_phrase().to_string()];

    if filters.coordinates().is_some()
    {   parts.push(format!(
          "near {}",
          state.entities.location.as_deref().unwrap_or("your location")
        ));
    }

    match (filters.min_price, filters.max_price)
    {   (Some(min), Some(max)) => {
          parts.push(format!("between ${} and ${}/hour", min, max))
        }
      , (None, Some(max)) => parts.push(format!("under ${}/hour", max))
      , (Some(min), None) => parts.push(format!("from ${}/hour", min))
      , (None, None) => {}
    }

    if !filters.features.is_empty()
    {   parts.push(format!("with {}", filters.features.join(", ")));
    }

    if let Some(start) = &filters.start_time
    {   parts.push(format!("starting {}", start));
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::{IntentType, SearchQuery};

    #[test]
    fn test_missing_location_is_an_error()
    {   let state = validate(RequestState::new(&SearchQuery::new("")));
        assert_eq!(
          state.error.as_deref(),
          Some(Error::LocationRequired.to_string().as_str())
        );
        assert_eq!(state.explanation, "Searching for parking spots");
    }

    #[test]
    fn test_explanation_order()
    {   let mut state = RequestState::new(&SearchQuery::new("q"));
        state.intent.intent_type = IntentType::PriceInquiry;
        state.entities.location = Some("Taipei 101".into());
        state.filters.lat = Some(25.03);
        state.filters.lng = Some(121.56);
        state.filters.max_price = Some(10.0);
        state.filters.features = vec!["covered".into(), "ev_charging".into()];
        state.filters.start_time = Some("2026-10-19T14:00:00".into());

        let state = validate(state);
        assert!(state.error.is_none());
        assert_eq!(
          state.explanation,
          "Looking up parking prices near Taipei 101 under $10/hour \
           with covered, ev_charging starting 2026-10-19T14:00:00"
        );
    }

    #[test]
    fn test_caller_position_reads_as_your_location()
    {   let mut state = RequestState::new(&SearchQuery::new("q"));
        state.filters.lat = Some(0.0);
        state.filters.lng = Some(0.0);
        state.filters.min_price = Some(2.5);
        assert_eq!(
          explain(&state),
          "Searching for parking spots near your location from $2.5/hour"
        );
    }
}
