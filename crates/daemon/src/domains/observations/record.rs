use serde_json::Value;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::timestamps::integer;
use super::{
    epoch_column, format_record_timestamp, parse_record_timestamp, record_timestamp, utc_offset,
    FlatRow, LocalTime,
};
use crate::EtlError;

/// Output columns, in the order downstream consumers expect them.
pub const CANONICAL_COLUMNS: [&str; 21] = [
    "city",
    "country_code",
    "weather_condition",
    "weather_description",
    "temperature",
    "feels_like_temp",
    "temp_min",
    "temp_max",
    "pressure",
    "humidity",
    "visibility_km",
    "wind_speed",
    "wind_direction_degrees",
    "cloudiness_percent",
    "latitude",
    "longitude",
    "measurement_datetime",
    "sunrise_datetime",
    "sunset_datetime",
    "record_timestamp",
    "timezone",
];

const COORDINATE_SCALE: f64 = 1e7;

/// One fetch cycle's weather snapshot, flattened and in final units.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub weather_condition: Option<String>,
    pub weather_description: Option<String>,
    pub temperature: Option<f64>,
    pub feels_like_temp: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub pressure: Option<i64>,
    pub humidity: Option<i64>,
    pub visibility_km: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction_degrees: Option<i64>,
    pub cloudiness_percent: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub measurement_datetime: Option<LocalTime>,
    pub sunrise_datetime: Option<LocalTime>,
    pub sunset_datetime: Option<LocalTime>,
    pub record_timestamp: PrimitiveDateTime,
    pub timezone: i64,
}

impl ProcessedRecord {
    /// Build the record from a standardized row.
    ///
    /// `run_time` is the instant the pipeline materializes the record; it
    /// becomes `record_timestamp` in the city's civil time. Missing or
    /// mistyped optional columns are left empty.
    pub fn from_row(row: &FlatRow, run_time: OffsetDateTime) -> Result<Self, EtlError> {
        let timezone = utc_offset(row)?;

        Ok(ProcessedRecord {
            city: text(row, "city"),
            country_code: text(row, "country_code"),
            weather_condition: text(row, "weather_condition"),
            weather_description: text(row, "weather_description"),
            temperature: float(row, "temperature"),
            feels_like_temp: float(row, "feels_like_temp"),
            temp_min: float(row, "temp_min"),
            temp_max: float(row, "temp_max"),
            pressure: whole(row, "pressure"),
            humidity: whole(row, "humidity"),
            visibility_km: float(row, "visibility_km").map(meters_to_km),
            wind_speed: float(row, "wind_speed"),
            wind_direction_degrees: whole(row, "wind_direction_degrees"),
            cloudiness_percent: whole(row, "cloudiness_percent"),
            latitude: float(row, "latitude").map(round_coordinate),
            longitude: float(row, "longitude").map(round_coordinate),
            measurement_datetime: epoch_column(row, "measurement_datetime", timezone),
            sunrise_datetime: epoch_column(row, "sunrise_datetime", timezone),
            sunset_datetime: epoch_column(row, "sunset_datetime", timezone),
            record_timestamp: record_timestamp(run_time, timezone)?,
            timezone,
        })
    }

    /// Present columns rendered as text, in canonical order.
    pub fn columns(&self) -> Vec<(&'static str, String)> {
        let coordinate = |v: &f64| format!("{:.7}", v);
        let cells = [
            self.city.clone(),
            self.country_code.clone(),
            self.weather_condition.clone(),
            self.weather_description.clone(),
            self.temperature.map(|v| v.to_string()),
            self.feels_like_temp.map(|v| v.to_string()),
            self.temp_min.map(|v| v.to_string()),
            self.temp_max.map(|v| v.to_string()),
            self.pressure.map(|v| v.to_string()),
            self.humidity.map(|v| v.to_string()),
            self.visibility_km.map(|v| v.to_string()),
            self.wind_speed.map(|v| v.to_string()),
            self.wind_direction_degrees.map(|v| v.to_string()),
            self.cloudiness_percent.map(|v| v.to_string()),
            self.latitude.as_ref().map(coordinate),
            self.longitude.as_ref().map(coordinate),
            self.measurement_datetime.map(|v| v.to_string()),
            self.sunrise_datetime.map(|v| v.to_string()),
            self.sunset_datetime.map(|v| v.to_string()),
            Some(format_record_timestamp(&self.record_timestamp)),
            Some(self.timezone.to_string()),
        ];

        CANONICAL_COLUMNS
            .into_iter()
            .zip(cells)
            .filter_map(|(name, cell)| cell.map(|value| (name, value)))
            .collect()
    }

    /// Rebuild a record from `(column, cell)` text pairs, e.g. one line of a
    /// processed file. Empty cells are absent values; unknown columns are ignored.
    pub fn from_columns<'a, I>(cells: I) -> Result<Self, EtlError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut record = ProcessedRecord {
            city: None,
            country_code: None,
            weather_condition: None,
            weather_description: None,
            temperature: None,
            feels_like_temp: None,
            temp_min: None,
            temp_max: None,
            pressure: None,
            humidity: None,
            visibility_km: None,
            wind_speed: None,
            wind_direction_degrees: None,
            cloudiness_percent: None,
            latitude: None,
            longitude: None,
            measurement_datetime: None,
            sunrise_datetime: None,
            sunset_datetime: None,
            record_timestamp: PrimitiveDateTime::MIN,
            timezone: 0,
        };
        let mut seen_timestamp = false;
        let mut seen_timezone = false;

        for (column, cell) in cells {
            if cell.is_empty() {
                continue;
            }
            match column {
                "city" => record.city = Some(cell.to_string()),
                "country_code" => record.country_code = Some(cell.to_string()),
                "weather_condition" => record.weather_condition = Some(cell.to_string()),
                "weather_description" => record.weather_description = Some(cell.to_string()),
                "temperature" => record.temperature = Some(parse_cell(column, cell)?),
                "feels_like_temp" => record.feels_like_temp = Some(parse_cell(column, cell)?),
                "temp_min" => record.temp_min = Some(parse_cell(column, cell)?),
                "temp_max" => record.temp_max = Some(parse_cell(column, cell)?),
                "pressure" => record.pressure = Some(parse_cell(column, cell)?),
                "humidity" => record.humidity = Some(parse_cell(column, cell)?),
                "visibility_km" => record.visibility_km = Some(parse_cell(column, cell)?),
                "wind_speed" => record.wind_speed = Some(parse_cell(column, cell)?),
                "wind_direction_degrees" => {
                    record.wind_direction_degrees = Some(parse_cell(column, cell)?)
                }
                "cloudiness_percent" => record.cloudiness_percent = Some(parse_cell(column, cell)?),
                "latitude" => record.latitude = Some(parse_cell(column, cell)?),
                "longitude" => record.longitude = Some(parse_cell(column, cell)?),
                "measurement_datetime" => {
                    record.measurement_datetime = Some(parse_cell(column, cell)?)
                }
                "sunrise_datetime" => record.sunrise_datetime = Some(parse_cell(column, cell)?),
                "sunset_datetime" => record.sunset_datetime = Some(parse_cell(column, cell)?),
                "record_timestamp" => {
                    record.record_timestamp = parse_record_timestamp(cell).map_err(|e| {
                        EtlError::MalformedInput(format!("bad record_timestamp {:?}: {}", cell, e))
                    })?;
                    seen_timestamp = true;
                }
                "timezone" => {
                    record.timezone = parse_cell(column, cell)?;
                    seen_timezone = true;
                }
                _ => {}
            }
        }

        if !seen_timestamp || !seen_timezone {
            return Err(EtlError::MalformedInput(String::from(
                "processed row is missing record_timestamp or timezone",
            )));
        }
        Ok(record)
    }

    pub fn has_unrepresentable_times(&self) -> bool {
        [
            self.measurement_datetime,
            self.sunrise_datetime,
            self.sunset_datetime,
        ]
        .contains(&Some(LocalTime::Unrepresentable))
    }
}

pub fn meters_to_km(meters: f64) -> f64 {
    meters / 1000.0
}

fn round_coordinate(degrees: f64) -> f64 {
    (degrees * COORDINATE_SCALE).round() / COORDINATE_SCALE
}

fn text(row: &FlatRow, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn float(row: &FlatRow, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::as_f64)
}

fn whole(row: &FlatRow, column: &str) -> Option<i64> {
    row.get(column).and_then(integer)
}

fn parse_cell<T>(column: &str, cell: &str) -> Result<T, EtlError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    cell.parse::<T>()
        .map_err(|e| EtlError::MalformedInput(format!("bad {} value {:?}: {}", column, cell, e)))
}
