//! A minimal dotted-path / bracket-index extractor for the `bodyJsonPath`
//! condition (§4.2). Not a full JSONPath implementation — only the subset
//! the condition table actually exercises: `$.a.b`, `$.a[0].b`.

use serde_json::Value;

/// Extract the value at `path` (a leading `$.` is stripped, matching
/// §4.2's "path stripped") from `doc`, or `None` if any segment fails to
/// resolve.
pub fn extract<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut cur = doc;
    for segment in split_segments(path) {
        cur = match segment {
            Segment::Key(key) => cur.as_object()?.get(key)?,
            Segment::Index(idx) => cur.as_array()?.get(idx)?,
        };
    }
    Some(cur)
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn split_segments(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        if dotted.is_empty() {
            continue;
        }
        let mut rest = dotted;
        if let Some(bracket_start) = rest.find('[') {
            let key = &rest[..bracket_start];
            if !key.is_empty() {
                segments.push(Segment::Key(key));
            }
            rest = &rest[bracket_start..];
            while let Some(stripped) = rest.strip_prefix('[') {
                if let Some(end) = stripped.find(']') {
                    if let Ok(idx) = stripped[..end].parse::<usize>() {
                        segments.push(Segment::Index(idx));
                    }
                    rest = &stripped[end + 1..];
                } else {
                    break;
                }
            }
        } else {
            segments.push(Segment::Key(rest));
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_path() {
        let doc = json!({"a": {"b": "c"}});
        assert_eq!(extract(&doc, "$.a.b"), Some(&json!("c")));
    }

    #[test]
    fn array_index() {
        let doc = json!({"a": [{"b": 1}, {"b": 2}]});
        assert_eq!(extract(&doc, "$.a[1].b"), Some(&json!(2)));
    }

    #[test]
    fn missing_segment_is_none() {
        let doc = json!({"a": 1});
        assert_eq!(extract(&doc, "$.a.b"), None);
    }
}
