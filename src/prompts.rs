//! Stage prompts and backend-specific instruction framing
//!
//! Everything here is pure: state fields in, prompt text out.

use crate::Coordinates;

/// Feature words the entity extractor is nudged towards
pub const KNOWN_FEATURES: &[&str] = &[
  "covered", "uncovered", "indoor", "outdoor"
, "ev_charging", "electric_charging", "tesla_charging"
, "handicap", "disabled", "accessible"
, "24/7", "24_hours", "overnight"
, "secure", "guarded", "surveillance"
, "valet", "self_park"
, "motorcycle", "bike", "bicycle"
, "wide_space", "compact", "large_vehicle"
];

const INTENT_SYSTEM_PROMPT: &str = r#"You are a parking search intent classifier. Analyze the user's query and determine their intent.

Possible intents:
- find_parking: User wants to find parking spots
- check_availability: User wants to check if specific spots are available
- get_directions: User wants directions to a parking spot
- price_inquiry: User is asking about parking prices
- feature_inquiry: User is asking about parking features

Return a JSON object with:
{
    "intent_type": "the intent type",
    "confidence": 0.0-1.0,
    "reasoning": "brief explanation"
}"#;

const ENTITY_SCHEMA: &str = r#"Extract and return a JSON object with these fields (use null for missing values):
{
    "location": "specific location or landmark mentioned",
    "features": ["list", "of", "requested", "features"],
    "max_price": null or number (per hour),
    "min_price": null or number (per hour),
    "radius": null or number (in meters, default 1000),
    "time_expressions": ["tomorrow morning", "2pm", etc],
    "duration_hours": null or number
}

Examples:
- "cheap parking" -> max_price: 5
- "under $10" -> max_price: 10
- "within 500m" -> radius: 500
- "covered spot with EV charging" -> features: ["covered", "ev_charging"]
- "tomorrow 2pm for 3 hours" -> time_expressions: ["tomorrow 2pm"], duration_hours: 3"#;

const VIBE_SCHEMA: &str = r##"Return a JSON object with:
{
  "vibe": {
    "score": 1-10,
    "summary": "brief description",
    "hashtags": ["#tag1", "#tag2", "#tag3"]
  },
  "parking": {
    "difficulty": 1-10,
    "level": "Easy|Moderate|Hard",
    "tips": ["tip1", "tip2"],
    "hashtags": ["#parking-tags"]
  },
  "transport": [
    {"method": "Car|Public|Walk", "reason": "why"}
  ]
}

Return ONLY valid JSON."##;

const VIBE_SYSTEM_PROMPT: &str
  = "You are a location analyst. Always return valid JSON.";

/// System and user halves of one stage prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair
{   pub system: String
  , pub user: String
}

/// Intent classification prompt
pub fn intent_prompt(query: &str) -> PromptPair
{   PromptPair
    {   system: INTENT_SYSTEM_PROMPT.to_string()
      , user: format!("Query: {}", query)
    }
}

/// Entity extraction prompt; the caller's position is passed as context
pub fn entity_prompt(
  query: &str
, user_location: Option<&Coordinates>
) -> PromptPair
{   let system = format!(
      "You are a parking search entity extractor. Extract relevant \
       information from the user's query.\n\nKnown parking features: \
       {}\n\n{}",
      KNOWN_FEATURES.join(", "),
      ENTITY_SCHEMA
    );
    let mut user = format!("Query: {}", query);
    if let Some(loc) = user_location
    {   user.push_str(&format!(
          "\nUser is currently at: lat={}, lng={}",
          loc.lat, loc.lng
        ));
    }
    PromptPair { system, user }
}

/// Location vibe prompt over already formatted points of interest
pub fn vibe_prompt(
  lat: f64
, lng: f64
, radius_m: u32
, pois: &str
) -> PromptPair
{   PromptPair
    {   system: VIBE_SYSTEM_PROMPT.to_string()
      , user: format!(
          "Analyze this location and provide parking insights.\n\n\
           Location: ({}, {})\nSearch radius: {}m\nNearby POIs: {}\n\n{}",
          lat, lng, radius_m, pois, VIBE_SCHEMA
        )
    }
}

/// How a string-prompted backend wraps system context around a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate
{   /// `System: ...\n\nUser: ...\n\nAssistant:`
    SystemUserTags
  , /// Llama-2 style `[INST] <<SYS>> ... <</SYS>> ... [/INST]`
    InstTags
  , /// System text, blank line, prompt
    Plain
}

impl PromptTemplate
{   /// Template for a vLLM-served model
    pub fn for_served_model(model: &str) -> Self
    {   let model = model.to_lowercase();
        if model.contains("instruct") || model.contains("gpt-oss")
        {   PromptTemplate::SystemUserTags
        } else
        {   PromptTemplate::Plain
        }
    }

    /// Template for a GGUF file loaded by llama.cpp
    pub fn for_model_file(file_name: &str) -> Self
    {   if file_name.to_lowercase().contains("instruct")
        {   PromptTemplate::InstTags
        } else
        {   PromptTemplate::Plain
        }
    }

    pub fn render(&self, system: &str, user: &str) -> String
    {   match self
        {   PromptTemplate::SystemUserTags => format!(
              "System: {}\n\nUser: {}\n\nAssistant:",
              system, user
            )
          , PromptTemplate::InstTags => format!(
              "[INST] <<SYS>>\n{}\n<</SYS>>\n\n{} [/INST]",
              system, user
            )
          , PromptTemplate::Plain => plain_concat(system, user)
        }
    }
}

/// Framing every backend understands
pub fn plain_concat(system: &str, user: &str) -> String
{   format!("{}\n\n{}", system, user)
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn test_intent_prompt_lists_every_intent()
    {   let pair = intent_prompt("cheap parking");
        for intent in [
          "find_parking", "check_availability", "get_directions"
        , "price_inquiry", "feature_inquiry"
        ]
        {   assert!(pair.system.contains(intent), "{}", intent);
        }
        assert_eq!(pair.user, "Query: cheap parking");
    }

    #[test]
    fn test_entity_prompt_includes_vocabulary_and_location()
    {   let here = Coordinates { lat: 25.04, lng: 121.51 };
        let pair = entity_prompt("near me", Some(&here));
        assert!(pair.system.contains("ev_charging, electric_charging"));
        assert!(pair.system.contains("duration_hours"));
        assert!(pair.user.ends_with("lat=25.04, lng=121.51"));

        let anonymous = entity_prompt("near me", None);
        assert_eq!(anonymous.user, "Query: near me");
    }

    #[test]
    fn test_template_selection()
    {   assert_eq!(
          PromptTemplate::for_served_model("openai/gpt-oss-20b"),
          PromptTemplate::SystemUserTags
        );
        assert_eq!(
          PromptTemplate::for_served_model("facebook/opt-125m"),
          PromptTemplate::Plain
        );
        assert_eq!(
          PromptTemplate::for_model_file(
            "mistral-7b-instruct-v0.2.Q4_K_M.gguf"
          ),
          PromptTemplate::InstTags
        );
    }

    #[test]
    fn test_template_rendering()
    {   assert_eq!(
          PromptTemplate::InstTags.render("sys", "hi"),
          "[INST] <<SYS>>\nsys\n<</SYS>>\n\nhi [/INST]"
        );
        assert_eq!(
          PromptTemplate::SystemUserTags.render("sys", "hi"),
          "System: sys\n\nUser: hi\n\nAssistant:"
        );
        assert_eq!(PromptTemplate::Plain.render("sys", "hi"), "sys\n\nhi");
    }
}
