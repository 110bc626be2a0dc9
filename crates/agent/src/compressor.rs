//! Bounds the size of tool results before they go back to the model.

use concierge_config::CompressorConfig;
use serde_json::{Map, Value, json};

/// Shrinks serialized tool results to fit a byte budget.
///
/// Results already within budget are returned unchanged. Oversized lists
/// are cut to `max_items` with a note of how many were dropped. Anything
/// still too large is hard-truncated with a marker.
#[derive(Debug, Clone)]
pub struct ResultCompressor {
    max_bytes: usize,
    max_items: usize,
}

impl ResultCompressor {
    pub fn new(max_bytes: usize, max_items: usize) -> Self {
        Self {
            max_bytes,
            max_items: max_items.max(1),
        }
    }

    pub fn from_config(config: &CompressorConfig) -> Self {
        Self::new(config.max_result_bytes, config.max_list_items)
    }

    /// Serialized form of `value`, never longer than `max_bytes`.
    pub fn compress(&self, value: &Value) -> String {
        let serialized = value.to_string();
        if serialized.len() <= self.max_bytes {
            return serialized;
        }

        let candidate = match value {
            Value::Array(items) if items.len() > self.max_items => Some(self.truncate_list(items)),
            Value::Object(map) if map.values().any(|v| self.is_long_list(v)) => {
                Some(self.truncate_fields(map))
            }
            _ => None,
        };

        match candidate {
            Some(c) if c.len() <= self.max_bytes => c,
            Some(c) => self.hard_truncate(&c, serialized.len()),
            None => self.hard_truncate(&serialized, serialized.len()),
        }
    }

    fn is_long_list(&self, value: &Value) -> bool {
        matches!(value, Value::Array(items) if items.len() > self.max_items)
    }

    fn truncate_list(&self, items: &[Value]) -> String {
        json!({
            "items": &items[..self.max_items],
            "_truncated": {
                "total": items.len(),
                "shown": self.max_items,
                "truncated": items.len() - self.max_items,
            }
        })
        .to_string()
    }

    fn truncate_fields(&self, map: &Map<String, Value>) -> String {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            match value {
                Value::Array(items) if items.len() > self.max_items => {
                    out.insert(key.clone(), Value::Array(items[..self.max_items].to_vec()));
                    out.insert(format!("{key}_total"), json!(items.len()));
                }
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        Value::Object(out).to_string()
    }

    fn hard_truncate(&self, text: &str, original_len: usize) -> String {
        let marker = format!("…[truncated, {original_len} bytes total]");
        if marker.len() >= self.max_bytes {
            return text[..floor_boundary(text, self.max_bytes)].to_string();
        }
        let cut = floor_boundary(text, self.max_bytes - marker.len());
        format!("{}{}", &text[..cut], marker)
    }
}

fn floor_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    let mut i = max;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_result_is_unchanged() {
        let c = ResultCompressor::new(8000, 20);
        let value = json!({"projects": [{"id": 1}, {"id": 2}]});
        assert_eq!(c.compress(&value), value.to_string());
    }

    #[test]
    fn long_list_is_cut_with_counts() {
        let c = ResultCompressor::new(800, 20);
        let items: Vec<Value> = (0..100).map(|i| json!({"id": i, "name": format!("item {i}")})).collect();
        let out = c.compress(&Value::Array(items));

        assert!(out.len() <= 800);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["items"].as_array().unwrap().len(), 20);
        assert_eq!(parsed["_truncated"]["total"], 100);
        assert_eq!(parsed["_truncated"]["shown"], 20);
        assert_eq!(parsed["_truncated"]["truncated"], 80);
    }

    #[test]
    fn list_fields_inside_objects_are_cut() {
        let c = ResultCompressor::new(100, 5);
        let rows: Vec<Value> = (0..60).map(|i| json!(i)).collect();
        let value = json!({"status": "ok", "rows": rows});
        let out = c.compress(&value);

        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["rows"].as_array().unwrap().len(), 5);
        assert_eq!(parsed["rows_total"], 60);
    }

    #[test]
    fn oversized_scalar_is_hard_truncated() {
        let c = ResultCompressor::new(100, 20);
        let value = Value::String("x".repeat(5000));
        let out = c.compress(&value);
        assert!(out.len() <= 100);
        assert!(out.contains("truncated"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let c = ResultCompressor::new(64, 20);
        let value = Value::String("é".repeat(200));
        let out = c.compress(&value);
        assert!(out.len() <= 64);
        assert!(out.starts_with("\"é"));
    }

    #[test]
    fn list_of_huge_items_still_fits() {
        let c = ResultCompressor::new(300, 3);
        let items: Vec<Value> = (0..10).map(|_| Value::String("y".repeat(1000))).collect();
        let out = c.compress(&Value::Array(items));
        assert!(out.len() <= 300);
    }

    #[test]
    fn tiny_budget_never_exceeded() {
        let c = ResultCompressor::new(8, 2);
        let out = c.compress(&json!({"a": "bbbbbbbbbbbbbbbbbbbbbbbbbbbb"}));
        assert!(out.len() <= 8);
    }
}
