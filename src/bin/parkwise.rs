//! parkwise command line
//! Runs one search, vibe analysis or health probe and prints JSON

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use parkwise_nl::vibe::{PointOfInterest, VibeRequest};
use parkwise_nl::{ParkwiseConfig, SearchOrchestrator, SearchQuery};

/// Natural-language parking search over the configured LLM backend
#[derive(Parser, Debug)]
#[command(name = "parkwise")]
#[command(about = "Turn parking questions into structured search filters")]
struct Args
{   #[command(subcommand)]
    command: Command
}

#[derive(Subcommand, Debug)]
enum Command
{   /// Parse one free-text query
    Search
    {   query: String
      , /// Caller latitude
        #[arg(long, requires = "lng")]
        lat: Option<f64>
      , /// Caller longitude
        #[arg(long, requires = "lat")]
        lng: Option<f64>
      , #[arg(long)]
        language: Option<String>
    }
  , /// Describe the area around a point and how hard parking is
    Vibe
    {   #[arg(long)]
        lat: f64
      , #[arg(long)]
        lng: f64
      , /// Search radius in meters
        #[arg(long, default_value_t = 500)]
        radius: u32
      , /// Nearby place as `name:type`; repeatable
        #[arg(long = "poi")]
        pois: Vec<String>
    }
  , /// Report service and provider health
    Health
  , /// Show the effective backend configuration
    Config
}

fn parse_poi(raw: &str) -> PointOfInterest
{   match raw.rsplit_once(':')
    {   Some((name, kind)) => PointOfInterest::new(name.trim(), kind.trim())
      , None => PointOfInterest::new(raw.trim(), "place")
    }
}

fn print_json<T: Serialize>(value: &T) -> bool
{   match serde_json::to_string_pretty(value)
    {   Ok(json) => {
          println!("{}", json);
          true
        }
      , Err(e) => {
          eprintln!("Failed to encode output: {}", e);
          false
        }
    }
}

#[tokio::main]
async fn main()
{   env_logger::init();
    let args = Args::parse();

    let config = match ParkwiseConfig::from_env()
    {   Ok(config) => config
      , Err(e) => {
          eprintln!("Invalid configuration: {}", e);
          std::process::exit(2);
        }
    };

    let orchestrator = SearchOrchestrator::new(config);
    match orchestrator.initialize().await
    {   Ok(kind) => info!("Using {} backend", kind)
      , Err(e) => warn!("Running degraded: {}", e)
    }

    let printed = match args.command
    {   Command::Search { query, lat, lng, language } => {
          let mut query = SearchQuery::new(query);
          if let (Some(lat), Some(lng)) = (lat, lng)
          {   query = query.with_location(lat, lng);
          }
          if let Some(language) = language
          {   query = query.with_language(language);
          }
          print_json(&orchestrator.process(query).await)
        }
      , Command::Vibe { lat, lng, radius, pois } => {
          let request = VibeRequest
          {   lat
            , lng
            , radius
            , pois: pois.iter().map(|p| parse_poi(p)).collect()
          };
          print_json(&orchestrator.analyze_vibe(&request).await)
        }
      , Command::Health => print_json(&orchestrator.health().await)
      , Command::Config => print_json(&orchestrator.active_config().await)
    };

    if !printed
    {   std::process::exit(1);
    }
}
