//! Entity to search-filter mapping

use log::{debug, info};

use super::{features, time, RequestState};
use crate::geocode::Geocoder;
use crate::{Filters, DEFAULT_RADIUS_M};

/// Fill `state.filters` from the extracted entities. A named place is
/// geocoded; when that fails or nothing was named, the caller's own
/// position is used.
pub async fn map_filters(
  mut state: RequestState
, geocoder: &dyn Geocoder
) -> RequestState
{   let location = state.entities.location.clone();
    let coordinates = match location
    {   Some(name) => {
          match geocoder.resolve_location(&name).await
          {   Some(found) => Some(found)
            , None => {
                debug!("Using caller position instead of '{}'", name);
                state.user_location
              }
          }
        }
      , None => state.user_location
    };

    let entities = &state.entities;
    let filters = Filters
    {   lat: coordinates.map(|c| c.lat)
      , lng: coordinates.map(|c| c.lng)
      , radius: entities.radius.unwrap_or(DEFAULT_RADIUS_M)
      , max_price: entities.max_price
      , min_price: entities.min_price
      , features: features::normalize_features(&entities.features)
          .into_iter()
          .collect()
      , available: true
      , start_time: entities.time_start.as_ref().map(time::to_iso8601)
      , end_time: entities.time_end.as_ref().map(time::to_iso8601)
    };
    info!(
      "Mapped filters: coordinates {:?}, radius {}m, {} features",
      coordinates,
      filters.radius,
      filters.features.len()
    );
    state.filters = filters;
    state
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::geocode::LandmarkGeocoder;
    use crate::{Coordinates, SearchQuery};

    fn state_with_location(
      location: Option<&str>
    , user: Option<(f64, f64)>
    ) -> RequestState
    {   let mut query = SearchQuery::new("parking");
        if let Some((lat, lng)) = user
        {   query = query.with_location(lat, lng);
        }
        let mut state = RequestState::new(&query);
        state.entities.location = location.map(str::to_string);
        state
    }

    #[tokio::test]
    async fn test_named_place_wins_over_caller()
    {   let state = map_filters(
          state_with_location(Some("Taipei 101"), Some((1.0, 2.0))),
          &LandmarkGeocoder::taipei()
        ).await;
        assert_eq!(
          state.filters.coordinates(),
          Some(Coordinates { lat: 25.0330, lng: 121.5654 })
        );
    }

    #[tokio::test]
    async fn test_unknown_place_falls_back_to_caller()
    {   let state = map_filters(
          state_with_location(Some("Atlantis"), Some((1.0, 2.0))),
          &LandmarkGeocoder::taipei()
        ).await;
        assert_eq!(state.filters.lat, Some(1.0));
        assert_eq!(state.filters.lng, Some(2.0));
    }

    #[tokio::test]
    async fn test_nothing_known_leaves_coordinates_empty()
    {   let mut state = state_with_location(None, None);
        state.entities.radius = None;
        state.entities.features.insert("indoor".into());
        state.entities.features.insert("covered".into());

        let state = map_filters(state, &LandmarkGeocoder::taipei()).await;
        assert_eq!(state.filters.coordinates(), None);
        assert_eq!(state.filters.radius, DEFAULT_RADIUS_M);
        assert_eq!(state.filters.features, vec!["covered".to_string()]);
        assert!(state.filters.available);
        assert_eq!(state.filters.start_time, None);
    }
}
