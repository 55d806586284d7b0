use slog::{error, info, Logger};
use std::{process::ExitCode, sync::Arc};
use time::OffsetDateTime;
use tokio::signal;
use weather_daemon::{
    get_config_info, setup_logger, EtlError, OpenWeatherClient, Pipeline, PipelineConfig,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match get_config_info() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("pipeline failed: configuration error");
            eprintln!("{:#}", err);
            return ExitCode::FAILURE;
        }
    };
    let logger = setup_logger(&cli);

    let pipeline = match build_pipeline(&logger, PipelineConfig::try_from(&cli)) {
        Ok(pipeline) => pipeline,
        Err(err) => return report_failure(&logger, &err),
    };

    let config = pipeline.config();
    info!(logger, "Weather ETL starting...");
    info!(
        logger,
        "  Config file: {}",
        cli.config.as_deref().unwrap_or("(defaults)")
    );
    info!(logger, "  City: {}", config.location.query());
    info!(logger, "  Raw dir: {}", config.raw_dir.display());
    info!(logger, "  Processed dir: {}", config.processed_dir.display());
    info!(logger, "  Table: {}", config.table);

    if cli.once {
        return match pipeline.run_once(OffsetDateTime::now_utc()).await {
            Ok(summary) => {
                info!(
                    logger,
                    "pipeline finished, {} rows loaded from {}",
                    summary.rows_loaded,
                    summary.processed_path.display()
                );
                ExitCode::SUCCESS
            }
            Err(err) => report_failure(&logger, &err),
        };
    }

    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(logger, "unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };
    pipeline.run_until(shutdown).await;
    info!(logger, "Weather ETL stopped");
    ExitCode::SUCCESS
}

fn build_pipeline(
    logger: &Logger,
    config: Result<PipelineConfig, EtlError>,
) -> Result<Pipeline, EtlError> {
    let config = config?;
    let source = OpenWeatherClient::new(
        logger.clone(),
        config.api_base_url.clone(),
        config.api_key.clone(),
        &config.user_agent,
    )?;
    Ok(Pipeline::new(logger.clone(), config, Arc::new(source)))
}

/// Operator detail goes to the log, the user gets one line on stderr.
fn report_failure(logger: &Logger, err: &EtlError) -> ExitCode {
    error!(logger, "pipeline failed: {:?}", err);
    eprintln!("pipeline failed: {}", err.category());
    ExitCode::FAILURE
}
