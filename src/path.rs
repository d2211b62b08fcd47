//! Dotted / JSON path access.
//!
//! Accepts `$.field`, `field.sub`, `items[0].name` and `items.0.name`; a
//! purely numeric segment addresses an array position.

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse a path into segments.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let path = path.trim();
    let path = path.trim_start_matches("$.");
    let path = path.trim_start_matches('$');

    let mut segments = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = path.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => push_segment(&mut segments, &mut current),
            '[' => {
                push_segment(&mut segments, &mut current);
                i += 1;
                let mut inner = String::new();
                while i < chars.len() && chars[i] != ']' {
                    inner.push(chars[i]);
                    i += 1;
                }
                let inner = inner.trim().trim_matches(|c| c == '"' || c == '\'');
                match inner.parse::<usize>() {
                    Ok(idx) => segments.push(PathSegment::Index(idx)),
                    Err(_) if !inner.is_empty() => segments.push(PathSegment::Key(inner.to_string())),
                    Err(_) => {}
                }
            }
            c => current.push(c),
        }
        i += 1;
    }
    push_segment(&mut segments, &mut current);

    segments
}

fn push_segment(segments: &mut Vec<PathSegment>, current: &mut String) {
    if current.is_empty() {
        return;
    }
    let segment = match current.parse::<usize>() {
        Ok(idx) => PathSegment::Index(idx),
        Err(_) => PathSegment::Key(current.clone()),
    };
    segments.push(segment);
    current.clear();
}

/// Read the value at a path. Missing segments, or `null` met mid-path, give `None`.
pub fn get_path<'a>(json: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    get_segments(json, &parse_path(path))
}

pub fn get_segments<'a>(json: &'a JsonValue, segments: &[PathSegment]) -> Option<&'a JsonValue> {
    let mut current = json;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), JsonValue::Object(map)) => map.get(key)?,
            (PathSegment::Index(idx), JsonValue::Array(arr)) => arr.get(*idx)?,
            (PathSegment::Index(idx), JsonValue::Object(map)) => map.get(&idx.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write a value at a path, creating intermediate containers as needed.
///
/// The container created for a missing segment is an array when the next
/// segment is numeric and an object otherwise.
pub fn set_path(json: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), PathError> {
    let segments = parse_path(path);

    if segments.is_empty() {
        *json = value;
        return Ok(());
    }

    let mut current = json;
    let last = segments.len() - 1;

    for (i, segment) in segments.iter().enumerate() {
        if current.is_null() {
            *current = empty_container(segment);
        }

        if i == last {
            match (segment, current) {
                (PathSegment::Key(key), JsonValue::Object(map)) => {
                    map.insert(key.clone(), value);
                }
                (PathSegment::Index(idx), JsonValue::Array(arr)) => {
                    while arr.len() <= *idx {
                        arr.push(JsonValue::Null);
                    }
                    arr[*idx] = value;
                }
                (PathSegment::Index(idx), JsonValue::Object(map)) => {
                    map.insert(idx.to_string(), value);
                }
                (PathSegment::Key(key), _) => return Err(PathError::NotAnObject(key.clone())),
                (PathSegment::Index(idx), _) => return Err(PathError::NotAnArray(*idx)),
            }
            return Ok(());
        }

        let next = empty_container(&segments[i + 1]);
        current = match (segment, current) {
            (PathSegment::Key(key), JsonValue::Object(map)) => {
                let slot = map.entry(key.clone()).or_insert(JsonValue::Null);
                if slot.is_null() {
                    *slot = next;
                }
                slot
            }
            (PathSegment::Index(idx), JsonValue::Array(arr)) => {
                while arr.len() <= *idx {
                    arr.push(JsonValue::Null);
                }
                let slot = &mut arr[*idx];
                if slot.is_null() {
                    *slot = next;
                }
                slot
            }
            (PathSegment::Index(idx), JsonValue::Object(map)) => {
                let slot = map.entry(idx.to_string()).or_insert(JsonValue::Null);
                if slot.is_null() {
                    *slot = next;
                }
                slot
            }
            (PathSegment::Key(key), _) => return Err(PathError::NotAnObject(key.clone())),
            (PathSegment::Index(idx), _) => return Err(PathError::NotAnArray(*idx)),
        };
    }

    Ok(())
}

fn empty_container(segment: &PathSegment) -> JsonValue {
    match segment {
        PathSegment::Index(_) => JsonValue::Array(vec![]),
        PathSegment::Key(_) => JsonValue::Object(serde_json::Map::new()),
    }
}

/// Path write errors.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Cannot set key '{0}' on non-object")]
    NotAnObject(String),

    #[error("Cannot set index {0} on non-array")]
    NotAnArray(usize),
}
