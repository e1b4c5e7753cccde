use serde_json::{json, Map, Value};

/// Parse repeated `KEY=VALUE` flags into a template inputs map.
pub fn parse_input_pairs(items: &[String]) -> Result<Map<String, Value>, String> {
    let mut out = Map::new();
    for s in items {
        let Some((k, val)) = s.split_once('=') else {
            return Err(format!("Invalid --input '{}', expected KEY=VALUE", s));
        };
        let key = k.trim();
        if key.is_empty() {
            return Err(format!("Invalid --input '{}', key is empty", s));
        }
        out.insert(key.to_string(), parse_value(val));
    }
    Ok(out)
}

pub fn parse_value(src: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(src) { return v; }
    if src.eq_ignore_ascii_case("null") { return Value::Null; }
    if src.eq_ignore_ascii_case("true") { return Value::Bool(true); }
    if src.eq_ignore_ascii_case("false") { return Value::Bool(false); }
    if let Ok(i) = src.parse::<i64>() { return Value::from(i); }
    if let Ok(f) = src.parse::<f64>() { return json!(f); }
    Value::String(src.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_with_typed_values() {
        let items = vec!["style=film noir".to_string(), "count=3".to_string(), "bw=TRUE".to_string()];
        let map = parse_input_pairs(&items).expect("parsed");
        assert_eq!(map["style"], "film noir");
        assert_eq!(map["count"], 3);
        assert_eq!(map["bw"], true);
        assert!(parse_input_pairs(&["novalue".to_string()]).is_err());
        assert!(parse_input_pairs(&["=x".to_string()]).is_err());
    }
}
