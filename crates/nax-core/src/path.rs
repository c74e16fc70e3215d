// ── Path index ──
//
// Dotted paths address nodes of the state document
// (`Device.ZoneOutputs.Zones.Zone01.ZoneAudio.Volume`). On the wire the
// same path is slash-delimited (`/Device/ZoneOutputs/...`).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::merge::Document;

/// Separator in the public, dotted form.
pub const SEPARATOR: char = '.';
/// Separator in HTTP paths.
pub const WIRE_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path '{path}' has an empty segment")]
    EmptySegment { path: String },

    #[error("path '{path}' has a segment containing '{WIRE_SEPARATOR}': '{segment}'")]
    ReservedCharacter { path: String, segment: String },
}

/// A validated path into the state document.
///
/// The public API stays string-based; this is the parsed form used
/// internally for wire conversion and fragment construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    /// Parse a dotted path. Rejects empty paths, empty segments
    /// (`A..B`, leading or trailing dots) and segments containing `/`.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        let mut segments = Vec::new();
        for segment in raw.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(PathError::EmptySegment { path: raw.into() });
            }
            if segment.contains(WIRE_SEPARATOR) {
                return Err(PathError::ReservedCharacter {
                    path: raw.into(),
                    segment: segment.into(),
                });
            }
            segments.push(segment.to_owned());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Slash-delimited form with a leading slash, for HTTP requests.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push(WIRE_SEPARATOR);
            out.push_str(segment);
        }
        out
    }
}

impl FromStr for DataPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Every path contained in `document`: one per key at every depth, for
/// both leaves and intermediate maps.
pub fn enumerate_paths(document: &Document) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect_paths(document, "", &mut paths);
    paths
}

fn collect_paths(map: &Map<String, Value>, prefix: &str, paths: &mut BTreeSet<String>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{SEPARATOR}{key}")
        };
        if let Value::Object(child) = value {
            collect_paths(child, &path, paths);
        }
        paths.insert(path);
    }
}

/// Resolve a dotted path. Fails soft: any missing segment (or a scalar
/// where a map is expected) yields `None`.
pub fn resolve<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(SEPARATOR);
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Wrap `value` in nested objects mirroring `path`, producing the
/// fragment shape the device accepts for writes.
pub fn nest(path: &DataPath, value: Value) -> Value {
    path.segments.iter().rev().fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.clone(), inner);
        Value::Object(map)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn enumerate_emits_leaves_and_intermediates() {
        let paths = enumerate_paths(&doc(json!({"X": {"Y": {"Z": 3}}})));
        let expected: BTreeSet<String> = ["X", "X.Y", "X.Y.Z"].map(String::from).into();
        assert_eq!(paths, expected);
    }

    #[test]
    fn enumerate_does_not_descend_into_arrays() {
        let paths = enumerate_paths(&doc(json!({"A": [{"B": 1}], "C": {}})));
        let expected: BTreeSet<String> = ["A", "C"].map(String::from).into();
        assert_eq!(paths, expected);
    }

    #[test]
    fn resolve_leaf_and_subtree() {
        let d = doc(json!({"X": {"Y": {"Z": 3}}}));
        assert_eq!(resolve(&d, "X.Y.Z"), Some(&json!(3)));
        assert_eq!(resolve(&d, "X.Y"), Some(&json!({"Z": 3})));
    }

    #[test]
    fn resolve_fails_soft() {
        let d = doc(json!({"X": {"Y": 3}}));
        assert_eq!(resolve(&d, "X.W"), None);
        assert_eq!(resolve(&d, "X.Y.Z"), None);
        assert_eq!(resolve(&d, "Q"), None);
        assert_eq!(resolve(&d, ""), None);
    }

    #[test]
    fn parse_round_trips_and_converts_to_wire() {
        let path = DataPath::parse("Device.ZoneOutputs.Zones.Zone01").unwrap();
        assert_eq!(path.to_string(), "Device.ZoneOutputs.Zones.Zone01");
        assert_eq!(path.to_wire(), "/Device/ZoneOutputs/Zones/Zone01");
        assert_eq!(path.segments().len(), 4);
    }

    #[test]
    fn parse_rejects_bad_paths() {
        assert_eq!(DataPath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            DataPath::parse("A..B"),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            DataPath::parse(".A"),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            DataPath::parse("A.B/C"),
            Err(PathError::ReservedCharacter { .. })
        ));
    }

    #[test]
    fn nest_builds_write_fragment() {
        let path: DataPath = "Device.ZoneOutputs.Zones.Zone01.ZoneAudio.Volume"
            .parse()
            .unwrap();
        assert_eq!(
            nest(&path, json!(750)),
            json!({"Device": {"ZoneOutputs": {"Zones": {"Zone01": {"ZoneAudio": {"Volume": 750}}}}}})
        );
    }
}
