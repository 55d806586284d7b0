use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::EtlError;

/// One flattened observation: dotted key path -> leaf value.
pub type FlatRow = BTreeMap<String, Value>;

pub const TIMEZONE_COLUMN: &str = "timezone";

const CONDITIONS_KEY: &str = "weather";
const NESTED_TIMEZONE_KEY: &str = "sys.timezone";

/// Parse a raw current-weather document and flatten it into a single row.
pub fn normalize(document: &str) -> Result<FlatRow, EtlError> {
    let value: Value = serde_json::from_str(document)
        .map_err(|e| EtlError::MalformedInput(format!("document is not valid JSON: {}", e)))?;
    normalize_value(value)
}

/// Flatten an already parsed document.
///
/// Nested objects become dotted keys (`main.temp`). The first entry of the
/// `weather` sequence is merged into the row and the sequence itself is
/// dropped; condition keys win over top-level keys of the same name.
pub fn normalize_value(document: Value) -> Result<FlatRow, EtlError> {
    let Value::Object(mut root) = document else {
        return Err(EtlError::MalformedInput(String::from(
            "expected a JSON object at the document root",
        )));
    };

    let condition = match root.remove(CONDITIONS_KEY) {
        Some(Value::Array(conditions)) => conditions.into_iter().next().ok_or_else(|| {
            EtlError::MalformedInput(String::from("`weather` sequence has no entries"))
        })?,
        Some(other) => {
            return Err(EtlError::MalformedInput(format!(
                "`weather` must be a sequence, found {}",
                kind(&other)
            )))
        }
        None => {
            return Err(EtlError::MalformedInput(String::from(
                "missing `weather` sequence",
            )))
        }
    };
    let Value::Object(condition) = condition else {
        return Err(EtlError::MalformedInput(format!(
            "first `weather` entry must be an object, found {}",
            kind(&condition)
        )));
    };

    let mut row = FlatRow::new();
    flatten_into(&mut row, None, root);
    flatten_into(&mut row, None, condition);

    if matches!(row.get(TIMEZONE_COLUMN), None | Some(Value::Null)) {
        if let Some(offset) = row.get(NESTED_TIMEZONE_KEY).cloned() {
            row.insert(TIMEZONE_COLUMN.to_string(), offset);
        }
    }
    match row.get(TIMEZONE_COLUMN) {
        None | Some(Value::Null) => Err(EtlError::Schema(String::from(
            "missing `timezone` offset, local times cannot be derived",
        ))),
        Some(_) => Ok(row),
    }
}

fn flatten_into(row: &mut FlatRow, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key,
        };
        match value {
            Value::Object(nested) => flatten_into(row, Some(path.as_str()), nested),
            leaf => {
                row.insert(path, leaf);
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::observations::SAMPLE_RESPONSE;
    use serde_json::json;

    #[test]
    fn flattens_sample_into_one_row_without_conditions() {
        let row = normalize(SAMPLE_RESPONSE).unwrap();

        assert!(!row.contains_key("weather"));
        assert!(row.keys().all(|k| !k.starts_with("weather.")));
        assert_eq!(row["main.temp"], json!(29.02));
        assert_eq!(row["coord.lat"], json!(-8.0539));
        assert_eq!(row["sys.sunset"], json!(1699994400));
        assert_eq!(row["main"], json!("Clouds"));
        assert_eq!(row["description"], json!("broken clouds"));
        assert_eq!(row["icon"], json!("04d"));
    }

    #[test]
    fn condition_id_wins_over_city_id() {
        let row = normalize(SAMPLE_RESPONSE).unwrap();
        assert_eq!(row["id"], json!(803));
    }

    #[test]
    fn only_first_condition_is_kept() {
        let row = normalize_value(json!({
            "weather": [
                {"id": 500, "main": "Rain", "description": "light rain"},
                {"id": 701, "main": "Mist", "description": "mist"}
            ],
            "timezone": 0
        }))
        .unwrap();
        assert_eq!(row["main"], json!("Rain"));
        assert_eq!(row["description"], json!("light rain"));
    }

    #[test]
    fn flattens_arbitrary_depth() {
        let row = normalize_value(json!({
            "weather": [{"main": "Clear"}],
            "timezone": 3600,
            "a": {"b": {"c": 1}}
        }))
        .unwrap();
        assert_eq!(row["a.b.c"], json!(1));
    }

    #[test]
    fn missing_conditions_is_malformed() {
        let err = normalize_value(json!({"timezone": 0, "dt": 1})).unwrap_err();
        assert!(matches!(err, EtlError::MalformedInput(_)));
    }

    #[test]
    fn empty_conditions_is_malformed() {
        let err = normalize_value(json!({"weather": [], "timezone": 0})).unwrap_err();
        assert!(matches!(err, EtlError::MalformedInput(_)));
    }

    #[test]
    fn conditions_of_wrong_shape_are_malformed() {
        let err = normalize_value(json!({"weather": "Clear", "timezone": 0})).unwrap_err();
        assert!(matches!(err, EtlError::MalformedInput(_)));

        let err = normalize_value(json!({"weather": ["Clear"], "timezone": 0})).unwrap_err();
        assert!(matches!(err, EtlError::MalformedInput(_)));
    }

    #[test]
    fn unparseable_document_is_malformed() {
        assert!(matches!(
            normalize("{not json").unwrap_err(),
            EtlError::MalformedInput(_)
        ));
        assert!(matches!(
            normalize("[1, 2, 3]").unwrap_err(),
            EtlError::MalformedInput(_)
        ));
    }

    #[test]
    fn missing_timezone_is_schema_error() {
        let err = normalize_value(json!({"weather": [{"main": "Clear"}], "dt": 1})).unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));

        let err =
            normalize_value(json!({"weather": [{"main": "Clear"}], "timezone": null})).unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn nested_timezone_is_promoted() {
        let row = normalize_value(json!({
            "weather": [{"main": "Clear"}],
            "sys": {"timezone": -10800}
        }))
        .unwrap();
        assert_eq!(row[TIMEZONE_COLUMN], json!(-10800));
    }

    #[test]
    fn null_timezone_falls_back_to_nested_offset() {
        let row = normalize_value(json!({
            "weather": [{"main": "Clear"}],
            "timezone": null,
            "sys": {"timezone": 3600}
        }))
        .unwrap();
        assert_eq!(row[TIMEZONE_COLUMN], json!(3600));
    }
}
