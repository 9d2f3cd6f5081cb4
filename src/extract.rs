//! Best-effort recovery of a JSON object from free-form model text

use log::{debug, trace};
use serde_json::{Map, Value};

/// Outcome of an extraction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted
{   /// The whole text was a JSON object
    Whole(Map<String, Value>)
  , /// A balanced `{...}` span inside surrounding prose
    Embedded(Map<String, Value>)
  , /// Nothing decodable was found
    Empty
}

impl Extracted
{   pub fn is_empty(&self) -> bool
    {   matches!(self, Extracted::Empty)
    }

    /// The recovered object, or an empty one
    pub fn into_object(self) -> Map<String, Value>
    {   match self
        {   Extracted::Whole(map) | Extracted::Embedded(map) => map
          , Extracted::Empty => Map::new()
        }
    }
}

/// Parse the whole text, else the first balanced `{...}` span.
/// Never fails; returns an empty object when nothing decodes.
pub fn extract_json(text: &str) -> Map<String, Value>
{   try_extract_json(text).into_object()
}

/// Same as [`extract_json`] but reports which attempt succeeded
pub fn try_extract_json(text: &str) -> Extracted
{   if let Ok(Value::Object(map)) = serde_json::from_str(text.trim())
    {   return Extracted::Whole(map);
    }

    match first_balanced_object(text)
    {   Some(span) => {
          trace!("Trying embedded JSON span of {} bytes", span.len());
          match serde_json::from_str(span)
          {   Ok(Value::Object(map)) => Extracted::Embedded(map)
            , _ => {
                debug!("Embedded JSON span did not decode");
                Extracted::Empty
              }
          }
        }
      , None => {
          debug!("No JSON object found in model output");
          Extracted::Empty
        }
    }
}

/// The first `{...}` span whose braces balance, honouring JSON strings
fn first_balanced_object(text: &str) -> Option<&str>
{   text.char_indices()
      .filter(|(_, c)| *c == '{')
      .find_map(|(start, _)| balanced_from(text, start))
}

fn balanced_from(text: &str, start: usize) -> Option<&str>
{   let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices()
    {   if in_string
        {   if escaped
            {   escaped = false;
            } else if c == '\\'
            {   escaped = true;
            } else if c == '"'
            {   in_string = false;
            }
            continue;
        }
        match c
        {   '"' => in_string = true
          , '{' => depth += 1
          , '}' => {
              depth -= 1;
              if depth == 0
              {   return Some(&text[start..start + offset + 1]);
              }
            }
          , _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests
{   use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_whole_text_object()
    {   let out = try_extract_json(r#" {"intent_type": "find_parking"} "#);
        assert!(matches!(out, Extracted::Whole(_)));
        assert_eq!(out.into_object()["intent_type"], "find_parking");
    }

    #[test]
    fn test_object_inside_prose_and_fences()
    {   let text = "Sure! Here you go:\n```json\n{\"max_price\": 10, \
                    \"note\": \"a } inside\"}\n```\nAnything else?";
        let out = try_extract_json(text);
        assert!(matches!(out, Extracted::Embedded(_)));
        let map = out.into_object();
        assert_eq!(map["max_price"], 10);
        assert_eq!(map["note"], "a } inside");
    }

    #[test]
    fn test_nested_objects_take_outer_span()
    {   let map = extract_json(
          "result: {\"a\": {\"b\": 1}, \"c\": 2} done"
        );
        assert_eq!(map["a"]["b"], 1);
        assert_eq!(map["c"], 2);
    }

    #[test]
    fn test_truncated_outer_falls_back_to_inner_balanced()
    {   let map = extract_json("{\"a\": {\"b\": 1}");
        assert_eq!(map.len(), 1);
        assert_eq!(map["b"], 1);
    }

    #[test]
    fn test_garbage_yields_empty()
    {   assert!(try_extract_json("no json here").is_empty());
        assert!(try_extract_json("{not: valid}").is_empty());
        assert!(extract_json("[1, 2, 3]").is_empty());
        assert!(extract_json("").is_empty());
    }

    proptest!
    {   #[test]
        fn prop_never_panics(text in ".{0,200}")
        {   let _ = extract_json(&text);
        }

        #[test]
        fn prop_brace_soup_never_panics(text in "[{}\"\\\\a:, ]{0,64}")
        {   let _ = extract_json(&text);
        }

        #[test]
        fn prop_object_survives_surrounding_prose(
          prefix in "[a-zA-Z .!]{0,30}"
        , suffix in "[a-zA-Z .!]{0,30}"
        , price in 0u32..1000
        )
        {   let text = format!(
              "{}{{\"max_price\": {}}}{}",
              prefix, price, suffix
            );
            let map = extract_json(&text);
            prop_assert_eq!(map["max_price"].as_u64(), Some(price as u64));
        }
    }
}
