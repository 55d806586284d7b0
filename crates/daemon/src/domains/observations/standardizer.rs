use super::FlatRow;

/// Keys that are ambiguous once the condition entry is merged into the row.
const INITIAL_RENAMES: [(&str, &str); 3] = [
    ("id", "weather_id"),
    ("main", "weather_main"),
    ("description", "weather_description"),
];

const DROPPED_COLUMNS: [&str; 8] = [
    "icon",
    "base",
    "main.grnd_level",
    "main.sea_level",
    "sys.type",
    "sys.id",
    "cod",
    "weather_id",
];

const FINAL_RENAMES: [(&str, &str); 18] = [
    ("weather_main", "weather_condition"),
    ("dt", "measurement_datetime"),
    ("visibility", "visibility_km"),
    ("name", "city"),
    ("coord.lon", "longitude"),
    ("coord.lat", "latitude"),
    ("sys.country", "country_code"),
    ("main.temp", "temperature"),
    ("main.feels_like", "feels_like_temp"),
    ("main.temp_min", "temp_min"),
    ("main.temp_max", "temp_max"),
    ("main.pressure", "pressure"),
    ("main.humidity", "humidity"),
    ("wind.speed", "wind_speed"),
    ("wind.deg", "wind_direction_degrees"),
    ("clouds.all", "cloudiness_percent"),
    ("sys.sunrise", "sunrise_datetime"),
    ("sys.sunset", "sunset_datetime"),
];

/// Column naming tables applied by [`standardize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRules {
    pub initial_renames: Vec<(String, String)>,
    pub dropped_columns: Vec<String>,
    pub final_renames: Vec<(String, String)>,
}

impl Default for TransformRules {
    fn default() -> Self {
        fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect()
        }

        TransformRules {
            initial_renames: owned(&INITIAL_RENAMES),
            dropped_columns: DROPPED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            final_renames: owned(&FINAL_RENAMES),
        }
    }
}

/// Rename, drop, rename again. Keys that are not present are skipped.
pub fn standardize(row: FlatRow, rules: &TransformRules) -> FlatRow {
    let mut row = rename(row, &rules.initial_renames);
    for column in &rules.dropped_columns {
        row.remove(column);
    }
    rename(row, &rules.final_renames)
}

// All renames of one pass see the original key, so `a -> b, b -> c` never chains.
fn rename(row: FlatRow, renames: &[(String, String)]) -> FlatRow {
    row.into_iter()
        .map(|(key, value)| {
            let key = renames
                .iter()
                .find(|(from, _)| *from == key)
                .map(|(_, to)| to.clone())
                .unwrap_or(key);
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::observations::{normalize, SAMPLE_RESPONSE};
    use serde_json::json;

    fn standardized_sample() -> FlatRow {
        standardize(normalize(SAMPLE_RESPONSE).unwrap(), &TransformRules::default())
    }

    #[test]
    fn produces_business_column_names() {
        let row = standardized_sample();

        assert_eq!(row["city"], json!("Recife"));
        assert_eq!(row["country_code"], json!("BR"));
        assert_eq!(row["weather_condition"], json!("Clouds"));
        assert_eq!(row["weather_description"], json!("broken clouds"));
        assert_eq!(row["temperature"], json!(29.02));
        assert_eq!(row["wind_direction_degrees"], json!(120));
        assert_eq!(row["cloudiness_percent"], json!(75));
        assert_eq!(row["measurement_datetime"], json!(1700000000));
        assert_eq!(row["visibility_km"], json!(10000));
        assert_eq!(row["timezone"], json!(-10800));
    }

    #[test]
    fn drops_unused_columns() {
        let row = standardized_sample();
        for column in DROPPED_COLUMNS {
            assert!(!row.contains_key(column), "{} should be dropped", column);
        }
        for column in ["id", "main", "description", "weather_main"] {
            assert!(!row.contains_key(column), "{} should be renamed", column);
        }
    }

    #[test]
    fn is_idempotent() {
        let once = standardized_sample();
        let twice = standardize(once.clone(), &TransformRules::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn tolerates_missing_and_unknown_keys() {
        let mut row = FlatRow::new();
        row.insert("name".to_string(), json!("Recife"));
        row.insert("rain.1h".to_string(), json!(0.4));

        let row = standardize(row, &TransformRules::default());
        assert_eq!(row.len(), 2);
        assert_eq!(row["city"], json!("Recife"));
        assert_eq!(row["rain.1h"], json!(0.4));
    }

    #[test]
    fn renames_within_a_pass_do_not_chain() {
        let rules = TransformRules {
            initial_renames: vec![
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "c".to_string()),
            ],
            dropped_columns: vec![],
            final_renames: vec![],
        };
        let mut row = FlatRow::new();
        row.insert("a".to_string(), json!(1));

        let row = standardize(row, &rules);
        assert_eq!(row.get("b"), Some(&json!(1)));
        assert!(!row.contains_key("c"));
    }
}
