//! Location-name resolution
//!
//! The pipeline depends only on [`Geocoder`]. [`LandmarkGeocoder`] is a
//! fixed table of Taipei landmarks matched by substring.

use async_trait::async_trait;
use log::{info, warn};

use crate::Coordinates;

/// Resolve a place name to coordinates
#[async_trait]
pub trait Geocoder: Send + Sync
{   async fn resolve_location(&self, name: &str) -> Option<Coordinates>;
}

/// Checked in order; the first key contained in the name wins
const TAIPEI_LANDMARKS: &[(&str, f64, f64)] = &[
  ("taipei 101", 25.0330, 121.5654)
, ("taipei main station", 25.0478, 121.5170)
, ("xinyi district", 25.0329, 121.5670)
, ("da'an district", 25.0261, 121.5462)
, ("zhongshan district", 25.0642, 121.5331)
, ("ximending", 25.0420, 121.5069)
, ("national taiwan university", 25.0174, 121.5405)
, ("ntu", 25.0174, 121.5405)
, ("shilin night market", 25.0880, 121.5240)
, ("beitou", 25.1321, 121.5011)
, ("the mall", 25.0330, 121.5654)
];

/// Lookup-table geocoder
#[derive(Debug, Clone)]
pub struct LandmarkGeocoder
{   entries: Vec<(String, Coordinates)>
}

impl LandmarkGeocoder
{   /// The built-in Taipei table
    pub fn taipei() -> Self
    {   LandmarkGeocoder
        {   entries: TAIPEI_LANDMARKS
              .iter()
              .map(|(name, lat, lng)| {
                (name.to_string(), Coordinates { lat: *lat, lng: *lng })
              })
              .collect()
        }
    }

    /// An empty table, extended with [`LandmarkGeocoder::with`]
    pub fn empty() -> Self
    {   LandmarkGeocoder { entries: Vec::new() }
    }

    pub fn with(mut self, name: &str, lat: f64, lng: f64) -> Self
    {   self.entries.push((name.to_lowercase(), Coordinates { lat, lng }));
        self
    }

    fn lookup(&self, name: &str) -> Option<Coordinates>
    {   let name = name.to_lowercase();
        self.entries
          .iter()
          .find(|(key, _)| name.contains(key.as_str()))
          .map(|(_, coords)| *coords)
    }
}

impl Default for LandmarkGeocoder
{   fn default() -> Self
    {   Self::taipei()
    }
}

#[async_trait]
impl Geocoder for LandmarkGeocoder
{   async fn resolve_location(&self, name: &str) -> Option<Coordinates>
    {   let found = self.lookup(name);
        match found
        {   Some(coords) => {
              info!("Geocoded '{}' to {:?}", name, coords)
            }
          , None => warn!("Could not geocode location: {}", name)
        }
        found
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn test_landmark_substring_match()
    {   let geocoder = LandmarkGeocoder::taipei();
        let coords = tokio_test::block_on(
          geocoder.resolve_location("Near TAIPEI 101 tower")
        ).unwrap();
        assert_eq!(coords, Coordinates { lat: 25.0330, lng: 121.5654 });
    }

    #[test]
    fn test_unknown_place_is_none()
    {   let geocoder = LandmarkGeocoder::taipei();
        assert!(
          tokio_test::block_on(geocoder.resolve_location("Kaohsiung"))
            .is_none()
        );
    }

    #[test]
    fn test_custom_table()
    {   let geocoder = LandmarkGeocoder::empty()
          .with("Ferry Building", 37.7955, -122.3937);
        let coords = tokio_test::block_on(
          geocoder.resolve_location("the ferry building")
        ).unwrap();
        assert_eq!(coords.lng, -122.3937);
    }
}
