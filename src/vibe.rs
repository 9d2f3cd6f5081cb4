//! Location vibe and parking-difficulty analysis

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use log::{error, info};

use crate::error::{Error, Result};
use crate::extract::extract_json;
use crate::prompts;
use crate::providers::Provider;

/// Points of interest passed to the model
const MAX_POIS: usize = 10;
const NEUTRAL_SCORE: u8 = 5;

fn default_radius() -> u32
{   500
}

fn unknown_name() -> String
{   "Unknown".to_string()
}

fn place_kind() -> String
{   "place".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest
{   #[serde(default = "unknown_name")]
    pub name: String
  , #[serde(rename = "type", default = "place_kind")]
    pub kind: String
}

impl PointOfInterest
{   pub fn new(name: &str, kind: &str) -> Self
    {   PointOfInterest
        {   name: name.to_string()
          , kind: kind.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeRequest
{   pub lat: f64
  , pub lng: f64
  , /// Meters
    #[serde(default = "default_radius")]
    pub radius: u32
  , #[serde(default)]
    pub pois: Vec<PointOfInterest>
}

impl VibeRequest
{   pub fn new(lat: f64, lng: f64) -> Self
    {   VibeRequest
        {   lat
          , lng
          , radius: default_radius()
          , pois: Vec::new()
        }
    }

    pub fn with_poi(mut self, name: &str, kind: &str) -> Self
    {   self.pois.push(PointOfInterest::new(name, kind));
        self
    }

    /// `name (type), ...` over the first few points
    pub fn poi_summary(&self) -> String
    {   if self.pois.is_empty()
        {   return "No POI data".to_string();
        }
        self.pois
          .iter()
          .take(MAX_POIS)
          .map(|p| format!("{} ({})", p.name, p.kind))
          .collect::<Vec<_>>()
          .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeSummary
{   /// 1 to 10
    pub score: u8
  , pub summary: String
  , pub hashtags: Vec<String>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingOutlook
{   /// 1 to 10
    pub difficulty: u8
  , /// Easy, Moderate or Hard
    pub level: String
  , pub tips: Vec<String>
  , pub hashtags: Vec<String>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOption
{   pub method: String
  , pub reason: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeReport
{   pub success: bool
  , pub vibe: VibeSummary
  , pub parking: ParkingOutlook
  , pub transport: Vec<TransportOption>
  , /// Backend that produced the analysis, `none` without one
    pub mode: String
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

impl VibeReport
{   /// Neutral report for a failed analysis
    pub fn failed(mode: &str, error: &Error) -> Self
    {   VibeReport
        {   success: false
          , vibe: VibeSummary
            {   score: NEUTRAL_SCORE
              , summary: "Analysis failed".to_string()
              , hashtags: Vec::new()
            }
          , parking: ParkingOutlook
            {   difficulty: NEUTRAL_SCORE
              , level: "Unknown".to_string()
              , tips: Vec::new()
              , hashtags: Vec::new()
            }
          , transport: Vec::new()
          , mode: mode.to_string()
          , error: Some(error.to_string())
        }
    }
}

/// Ask `provider` about the area around `request`
pub async fn analyze(
  provider: &dyn Provider
, request: &VibeRequest
, mode: &str
) -> VibeReport
{   match run_analysis(provider, request).await
    {   Ok(object) => {
          let report = report_from(&object, mode);
          info!(
            "Vibe at ({}, {}): score {}, parking {}",
            request.lat, request.lng,
            report.vibe.score, report.parking.level
          );
          report
        }
      , Err(e) => {
          error!("Vibe analysis error: {}", e);
          VibeReport::failed(mode, &e)
        }
    }
}

async fn run_analysis(
  provider: &dyn Provider
, request: &VibeRequest
) -> Result<Map<String, Value>>
{   let prompt = prompts::vibe_prompt(
      request.lat,
      request.lng,
      request.radius,
      &request.poi_summary()
    );
    let text = provider
      .generate_structured(&prompt.user, Some(&prompt.system))
      .await?;
    Ok(extract_json(&text))
}

/// Build a report, filling each missing or malformed section with its
/// default
pub fn report_from(object: &Map<String, Value>, mode: &str) -> VibeReport
{   let vibe = match object.get("vibe").and_then(Value::as_object)
    {   Some(v) => VibeSummary
        {   score: scale(v.get("score"))
          , summary: text(v.get("summary"), "Average location")
          , hashtags: strings(v.get("hashtags"))
        }
      , None => VibeSummary
        {   score: NEUTRAL_SCORE
          , summary: "Average location".to_string()
          , hashtags: vec!["#parking".to_string()]
        }
    };

    let parking = match object.get("parking").and_then(Value::as_object)
    {   Some(p) => ParkingOutlook
        {   difficulty: scale(p.get("difficulty"))
          , level: text(p.get("level"), "Moderate")
          , tips: strings(p.get("tips"))
          , hashtags: strings(p.get("hashtags"))
        }
      , None => ParkingOutlook
        {   difficulty: NEUTRAL_SCORE
          , level: "Moderate".to_string()
          , tips: vec!["Check peak hours".to_string()]
          , hashtags: vec!["#street-parking".to_string()]
        }
    };

    let transport = match object.get("transport").and_then(Value::as_array)
    {   Some(items) => items
          .iter()
          .filter_map(Value::as_object)
          .map(|t| TransportOption
          {   method: text(t.get("method"), "Car")
            , reason: text(t.get("reason"), "")
          })
          .collect()
      , None => vec![TransportOption
        {   method: "Car".to_string()
          , reason: "Most convenient".to_string()
        }]
    };

    VibeReport
    {   success: true
      , vibe
      , parking
      , transport
      , mode: mode.to_string()
      , error: None
    }
}

/// A 1..=10 rating; anything unreadable is neutral
fn scale(value: Option<&Value>) -> u8
{   value
      .and_then(Value::as_f64)
      .filter(|v| v.is_finite())
      .map(|v| v.round().clamp(1.0, 10.0) as u8)
      .unwrap_or(NEUTRAL_SCORE)
}

fn text(value: Option<&Value>, default: &str) -> String
{   value
      .and_then(Value::as_str)
      .unwrap_or(default)
      .to_string()
}

fn strings(value: Option<&Value>) -> Vec<String>
{   value
      .and_then(Value::as_array)
      .map(|items| {
        items
          .iter()
          .filter_map(Value::as_str)
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default()
}
