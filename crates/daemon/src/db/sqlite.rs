use slog::{debug, info, Logger};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{str::FromStr, time::Duration};

use crate::{format_record_timestamp, EtlError, LocalTime, ProcessedRecord};

/// Append-only store for processed weather records.
pub struct WeatherStore {
    pool: SqlitePool,
    table: String,
    logger: Logger,
}

impl WeatherStore {
    pub async fn connect(database_url: &str, table: &str, logger: Logger) -> Result<Self, EtlError> {
        validate_table_name(table)?;

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .pragma("busy_timeout", "5000");

        // one connection: runs are sequential and `sqlite::memory:` is per connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        debug!(logger, "connected to weather store, table {}", table);
        Ok(Self {
            pool,
            table: table.to_string(),
            logger,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the records table when it does not exist yet.
    pub async fn ensure_table(&self) -> Result<(), EtlError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                city VARCHAR(255),
                country_code VARCHAR(10),
                weather_condition VARCHAR(255),
                weather_description TEXT,
                temperature REAL,
                feels_like_temp REAL,
                temp_min REAL,
                temp_max REAL,
                pressure INTEGER,
                humidity INTEGER,
                visibility_km REAL,
                wind_speed REAL,
                wind_direction_degrees INTEGER,
                cloudiness_percent INTEGER,
                latitude NUMERIC(10, 7),
                longitude NUMERIC(10, 7),
                measurement_datetime TIME,
                sunrise_datetime TIME,
                sunset_datetime TIME,
                record_timestamp TIMESTAMP NOT NULL,
                timezone INTEGER NOT NULL
            )",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!(self.logger, "table {} is present", self.table);
        Ok(())
    }

    /// Insert all records in one transaction. Either every row is committed
    /// or none is.
    ///
    /// Time-of-day values marked invalid are stored as NULL.
    pub async fn append(&self, records: &[ProcessedRecord]) -> Result<u64, EtlError> {
        let sql = format!(
            "INSERT INTO {} (
                city, country_code, weather_condition, weather_description,
                temperature, feels_like_temp, temp_min, temp_max, pressure, humidity,
                visibility_km, wind_speed, wind_direction_degrees, cloudiness_percent,
                latitude, longitude,
                measurement_datetime, sunrise_datetime, sunset_datetime,
                record_timestamp, timezone
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(&sql)
                .bind(record.city.as_deref())
                .bind(record.country_code.as_deref())
                .bind(record.weather_condition.as_deref())
                .bind(record.weather_description.as_deref())
                .bind(record.temperature)
                .bind(record.feels_like_temp)
                .bind(record.temp_min)
                .bind(record.temp_max)
                .bind(record.pressure)
                .bind(record.humidity)
                .bind(record.visibility_km)
                .bind(record.wind_speed)
                .bind(record.wind_direction_degrees)
                .bind(record.cloudiness_percent)
                .bind(record.latitude)
                .bind(record.longitude)
                .bind(time_column(record.measurement_datetime))
                .bind(time_column(record.sunrise_datetime))
                .bind(time_column(record.sunset_datetime))
                .bind(format_record_timestamp(&record.record_timestamp))
                .bind(record.timezone)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        info!(self.logger, "appended {} rows to {}", inserted, self.table);
        Ok(inserted)
    }

    pub async fn count(&self) -> Result<i64, EtlError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> Result<(), EtlError> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EtlError::Configuration(format!(
            "invalid table name {:?}, expected letters, digits and underscores",
            table
        )))
    }
}

/// Only SQLite connection strings are accepted; anything else would pass the
/// fetch and transform stages and fail at load time.
pub fn validate_database_url(database_url: &str) -> Result<(), EtlError> {
    if !database_url.starts_with("sqlite:") {
        return Err(EtlError::Configuration(String::from(
            "database url must use the sqlite: scheme, e.g. sqlite://data/weather.db",
        )));
    }
    SqliteConnectOptions::from_str(database_url)
        .map(|_| ())
        .map_err(|e| EtlError::Configuration(format!("invalid database url: {}", e)))
}

fn time_column(value: Option<LocalTime>) -> Option<String> {
    value
        .and_then(|local| local.time())
        .map(|time| LocalTime::At(time).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::observations::{normalize, standardize, TransformRules, SAMPLE_RESPONSE};
    use sqlx::Row;
    use time::macros::datetime;

    fn sample_record() -> ProcessedRecord {
        let row = standardize(normalize(SAMPLE_RESPONSE).unwrap(), &TransformRules::default());
        ProcessedRecord::from_row(&row, datetime!(2023-11-15 01:30:45 UTC)).unwrap()
    }

    async fn memory_store() -> WeatherStore {
        let store = WeatherStore::connect(
            "sqlite::memory:",
            "recife_weather_records",
            Logger::root(slog::Discard, slog::o!()),
        )
        .await
        .unwrap();
        store.ensure_table().await.unwrap();
        store
    }

    #[tokio::test]
    async fn appends_records() {
        let store = memory_store().await;

        assert_eq!(store.append(&[sample_record()]).await.unwrap(), 1);
        assert_eq!(store.append(&[sample_record()]).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 2);

        let row = sqlx::query(
            "SELECT city, measurement_datetime, record_timestamp, timezone, visibility_km \
             FROM recife_weather_records LIMIT 1",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("city"), "Recife");
        assert_eq!(row.get::<String, _>("measurement_datetime"), "19:13:20");
        assert_eq!(row.get::<String, _>("record_timestamp"), "2023-11-14 22:30:45");
        assert_eq!(row.get::<i64, _>("timezone"), -10_800);
        assert_eq!(row.get::<f64, _>("visibility_km"), 10.0);
    }

    #[tokio::test]
    async fn ensure_table_is_repeatable() {
        let store = memory_store().await;
        store.ensure_table().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_times_and_missing_fields_are_null() {
        let store = memory_store().await;
        let mut record = sample_record();
        record.sunrise_datetime = Some(LocalTime::Unrepresentable);
        record.sunset_datetime = None;
        record.city = None;
        store.append(&[record]).await.unwrap();

        let row = sqlx::query(
            "SELECT city, sunrise_datetime, sunset_datetime FROM recife_weather_records",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<Option<String>, _>("city"), None);
        assert_eq!(row.get::<Option<String>, _>("sunrise_datetime"), None);
        assert_eq!(row.get::<Option<String>, _>("sunset_datetime"), None);
    }

    #[tokio::test]
    async fn append_without_table_fails_atomically() {
        let store = WeatherStore::connect(
            "sqlite::memory:",
            "recife_weather_records",
            Logger::root(slog::Discard, slog::o!()),
        )
        .await
        .unwrap();

        let err = store.append(&[sample_record()]).await.unwrap_err();
        assert!(matches!(err, EtlError::Persistence(_)));
    }

    #[test]
    fn database_urls_must_be_sqlite() {
        assert!(validate_database_url("sqlite::memory:").is_ok());
        assert!(validate_database_url("sqlite://data/weather.db").is_ok());
        for bad in [
            "postgres://etl:pw@localhost:5432/weather",
            "mysql://localhost/weather",
            "data/weather.db",
        ] {
            assert!(matches!(
                validate_database_url(bad),
                Err(EtlError::Configuration(_))
            ));
        }
    }

    #[test]
    fn table_names_must_be_identifiers() {
        assert!(validate_table_name("recife_weather_records").is_ok());
        assert!(validate_table_name("_t1").is_ok());
        for bad in ["", "1table", "records; DROP TABLE x", "weather-data", "a.b"] {
            assert!(matches!(
                validate_table_name(bad),
                Err(EtlError::Configuration(_))
            ));
        }
    }
}
