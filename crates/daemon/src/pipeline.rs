use slog::{debug, error, info, Logger};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::{macros::format_description, OffsetDateTime, UtcOffset};
use weather_etl_core::create_dir_all;

use crate::{
    read_processed_file, save_raw_observation, EtlError, PipelineConfig, TransformRules,
    Transformer, WeatherSource, WeatherStore,
};

/// Paths and row count produced by one successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub raw_path: PathBuf,
    pub processed_path: PathBuf,
    pub rows_loaded: u64,
}

/// Fetch -> transform -> load for one configured city.
pub struct Pipeline {
    logger: Logger,
    config: PipelineConfig,
    source: Arc<dyn WeatherSource>,
    transformer: Transformer,
}

impl Pipeline {
    pub fn new(logger: Logger, config: PipelineConfig, source: Arc<dyn WeatherSource>) -> Self {
        let transformer = Transformer::new(logger.clone(), TransformRules::default());
        Self {
            logger,
            config,
            source,
            transformer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage once. `run_time` names the files and becomes the
    /// record timestamp.
    ///
    /// A failure after the fetch keeps the raw file on disk; a failure in the
    /// transform publishes no processed file.
    pub async fn run_once(&self, run_time: OffsetDateTime) -> Result<RunSummary, EtlError> {
        let stamp = run_stamp(run_time)?;
        let slug = self.config.location.slug();

        for dir in [&self.config.raw_dir, &self.config.processed_dir] {
            create_dir_all(dir).map_err(|e| EtlError::io(dir, e))?;
        }

        info!(self.logger, "[1/3] extracting weather for {}", self.config.location.query());
        let body = self.source.fetch_current(&self.config.location).await?;
        let raw_path = save_raw_observation(
            &self
                .config
                .raw_dir
                .join(format!("{}_weather_{}.json", slug, stamp)),
            &body,
        )?;
        info!(self.logger, "raw data saved to {}", raw_path.display());

        info!(self.logger, "[2/3] transforming {}", raw_path.display());
        let processed_path = self.transformer.transform_file(
            &raw_path,
            &self
                .config
                .processed_dir
                .join(format!("processed_{}_weather_{}.csv", slug, stamp)),
            run_time,
        )?;

        info!(self.logger, "[3/3] loading {}", processed_path.display());
        let store = WeatherStore::connect(
            &self.config.database_url,
            &self.config.table,
            self.logger.clone(),
        )
        .await?;
        let loaded = async {
            store.ensure_table().await?;
            let records = read_processed_file(&processed_path)?;
            debug!(self.logger, "read {} records back from processed file", records.len());
            store.append(&records).await
        }
        .await;
        store.close().await;
        let rows_loaded = loaded?;

        Ok(RunSummary {
            raw_path,
            processed_path,
            rows_loaded,
        })
    }

    /// Run immediately, then on every `sleep_interval` tick, until `shutdown`
    /// resolves. A run in flight when shutdown is requested completes first;
    /// failed runs are logged and the loop waits for the next tick.
    pub async fn run_until<F: Future>(&self, shutdown: F) {
        let sleep_between_runs = self.config.sleep_interval;
        info!(
            self.logger,
            "Wait time between pipeline runs: {} seconds", sleep_between_runs
        );

        // created once so a signal arriving during a run is not lost
        tokio::pin!(shutdown);
        let mut run_interval = tokio::time::interval(Duration::from_secs(sleep_between_runs));
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(self.logger, "Shutdown requested, stopping");
                    break;
                }
                _ = run_interval.tick() => {
                    match self.run_once(OffsetDateTime::now_utc()).await {
                        Ok(summary) => info!(
                            self.logger,
                            "Loaded {} rows, waiting {} seconds for next run",
                            summary.rows_loaded,
                            sleep_between_runs
                        ),
                        Err(err) => error!(
                            self.logger,
                            "Pipeline run failed ({}): {:?}",
                            err.category(),
                            err
                        ),
                    }
                }
            }
        }
    }
}

/// UTC run time as used in file names, e.g. `20231115T013045`.
pub fn run_stamp(run_time: OffsetDateTime) -> Result<String, EtlError> {
    Ok(run_time
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]"
        ))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Location, MockWeatherSource};
    use std::fs;
    use time::macros::datetime;

    const SAMPLE: &str = include_str!("../tests/fixtures/recife_current.json");
    const RUN_TIME: OffsetDateTime = datetime!(2023-11-15 01:30:45 UTC);

    fn config(root: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            location: Location {
                city: String::from("Recife"),
                country_code: String::from("BR"),
            },
            api_key: String::from("test-key"),
            api_base_url: String::from("http://localhost:0"),
            database_url: format!("sqlite://{}", root.join("weather.db").display()),
            table: String::from("recife_weather_records"),
            raw_dir: root.join("raw"),
            processed_dir: root.join("processed"),
            user_agent: String::from("weather-daemon/test"),
            sleep_interval: 60,
        }
    }

    fn pipeline_with(root: &std::path::Path, source: MockWeatherSource) -> Pipeline {
        Pipeline::new(
            Logger::root(slog::Discard, slog::o!()),
            config(root),
            Arc::new(source),
        )
    }

    #[tokio::test]
    async fn runs_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch_current()
            .times(1)
            .returning(|_| Ok(SAMPLE.to_string()));

        let summary = pipeline_with(dir.path(), source)
            .run_once(RUN_TIME)
            .await
            .unwrap();

        assert_eq!(
            summary.raw_path,
            dir.path().join("raw/recife_weather_20231115T013045.json")
        );
        assert_eq!(
            summary.processed_path,
            dir.path()
                .join("processed/processed_recife_weather_20231115T013045.csv")
        );
        assert_eq!(summary.rows_loaded, 1);

        let store = WeatherStore::connect(
            &config(dir.path()).database_url,
            "recife_weather_records",
            Logger::root(slog::Discard, slog::o!()),
        )
        .await
        .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn consecutive_runs_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch_current()
            .times(2)
            .returning(|_| Ok(SAMPLE.to_string()));
        let pipeline = pipeline_with(dir.path(), source);

        pipeline.run_once(RUN_TIME).await.unwrap();
        let second = pipeline
            .run_once(RUN_TIME + time::Duration::hours(9))
            .await
            .unwrap();
        assert_eq!(second.rows_loaded, 1);

        let store = WeatherStore::connect(
            &pipeline.config().database_url,
            "recife_weather_records",
            Logger::root(slog::Discard, slog::o!()),
        )
        .await
        .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn malformed_response_keeps_raw_file_and_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch_current()
            .returning(|_| Ok(String::from(r#"{"cod": 200, "timezone": -10800}"#)));

        let err = pipeline_with(dir.path(), source)
            .run_once(RUN_TIME)
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::MalformedInput(_)));
        assert!(dir
            .path()
            .join("raw/recife_weather_20231115T013045.json")
            .exists());
        assert_eq!(fs::read_dir(dir.path().join("processed")).unwrap().count(), 0);
        assert!(!dir.path().join("weather.db").exists());
    }

    #[tokio::test]
    async fn fetch_errors_surface_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockWeatherSource::new();
        source
            .expect_fetch_current()
            .returning(|_| Err(EtlError::Fetch(String::from("401 Unauthorized"))));

        let err = pipeline_with(dir.path(), source)
            .run_once(RUN_TIME)
            .await
            .unwrap_err();

        assert_eq!(err.category(), "fetch error");
        assert_eq!(fs::read_dir(dir.path().join("raw")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn shutdown_during_a_run_stops_after_it() {
        let dir = tempfile::tempdir().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let stop = std::sync::Mutex::new(Some(stop));

        let mut source = MockWeatherSource::new();
        source.expect_fetch_current().times(1).returning(move |_| {
            if let Some(stop) = stop.lock().unwrap().take() {
                stop.send(()).unwrap();
            }
            Ok(SAMPLE.to_string())
        });
        let mut config = config(dir.path());
        config.sleep_interval = 3600;
        let pipeline = Pipeline::new(
            Logger::root(slog::Discard, slog::o!()),
            config,
            Arc::new(source),
        );

        tokio::time::timeout(Duration::from_secs(30), pipeline.run_until(stopped))
            .await
            .unwrap();
        assert_eq!(fs::read_dir(dir.path().join("processed")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn failed_runs_keep_the_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let stop = std::sync::Mutex::new(Some(stop));
        let calls = std::sync::atomic::AtomicUsize::new(0);

        let mut source = MockWeatherSource::new();
        source.expect_fetch_current().times(2).returning(move |_| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                return Err(EtlError::Fetch(String::from("503 Service Unavailable")));
            }
            if let Some(stop) = stop.lock().unwrap().take() {
                stop.send(()).unwrap();
            }
            Ok(SAMPLE.to_string())
        });
        let mut config = config(dir.path());
        config.sleep_interval = 1;
        let pipeline = Pipeline::new(
            Logger::root(slog::Discard, slog::o!()),
            config,
            Arc::new(source),
        );

        tokio::time::timeout(Duration::from_secs(30), pipeline.run_until(stopped))
            .await
            .unwrap();
        assert_eq!(fs::read_dir(dir.path().join("processed")).unwrap().count(), 1);
    }

    #[test]
    fn run_stamp_uses_utc() {
        let local = datetime!(2023-11-14 22:30:45 -3);
        assert_eq!(run_stamp(local).unwrap(), "20231115T013045");
    }
}
