//! Canonical feature vocabulary

use std::collections::BTreeSet;

/// Free-form spelling to canonical tag
const FEATURE_SYNONYMS: &[(&str, &str)] = &[
  ("ev_charging", "ev_charging")
, ("electric_charging", "ev_charging")
, ("charging", "ev_charging")
, ("tesla_charging", "tesla_supercharger")
, ("covered", "covered")
, ("indoor", "covered")
, ("uncovered", "uncovered")
, ("outdoor", "uncovered")
, ("handicap", "handicap_accessible")
, ("disabled", "handicap_accessible")
, ("accessible", "handicap_accessible")
, ("wheelchair", "handicap_accessible")
, ("secure", "security_patrol")
, ("guarded", "security_patrol")
, ("surveillance", "cctv")
, ("camera", "cctv")
, ("24/7", "24_7_access")
, ("24_hours", "24_7_access")
, ("overnight", "overnight_allowed")
, ("motorcycle", "motorcycle_allowed")
, ("bike", "motorcycle_allowed")
, ("bicycle", "bicycle_parking")
, ("wide_space", "wide_space")
, ("large_vehicle", "wide_space")
, ("compact", "compact_only")
, ("valet", "valet_service")
, ("self_park", "self_park")
];

/// Lowercase, trim and snake-case one raw feature, then map it
/// through the synonym table. Unknown words pass through; blanks
/// yield `None`.
pub fn canonical_feature(raw: &str) -> Option<String>
{   let key = raw
      .trim()
      .to_lowercase()
      .split_whitespace()
      .collect::<Vec<_>>()
      .join("_");
    if key.is_empty()
    {   return None;
    }
    let canonical = FEATURE_SYNONYMS
      .iter()
      .find(|(word, _)| *word == key)
      .map(|(_, tag)| tag.to_string())
      .unwrap_or(key);
    Some(canonical)
}

/// Canonical, de-duplicated feature set
pub fn normalize_features<I, S>(features: I) -> BTreeSet<String>
where
  I: IntoIterator<Item = S>
, S: AsRef<str>
{   features
      .into_iter()
      .filter_map(|f| canonical_feature(f.as_ref()))
      .collect()
}
