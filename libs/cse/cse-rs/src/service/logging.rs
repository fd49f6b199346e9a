use std::env;

use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, fmt, Layer};

use crate::model::core_config::Config;
use crate::model::errors::{core_err_unexpected, CseResult};

pub static LOG_FILE: &str = "cse.log";

pub fn init(config: &Config) -> CseResult<()> {
    if config.logs {
        let cse_log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| s.as_str().parse().ok())
            .unwrap_or(LevelFilter::DEBUG);

        let mut layers = Vec::with_capacity(2);

        layers.push(
            fmt::Layer::new()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(config.colored_logs)
                .with_target(true)
                .with_writer(tracing_appender::rolling::never(&config.writeable_path, LOG_FILE))
                .with_filter(cse_log_level)
                .with_filter(filter::filter_fn(|metadata| {
                    metadata.target().starts_with("cse_rs")
                }))
                .boxed(),
        );

        if config.stdout_logs {
            layers.push(
                fmt::Layer::new()
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_ansi(config.colored_logs)
                    .with_target(true)
                    .with_filter(cse_log_level)
                    .with_filter(filter::filter_fn(|metadata| {
                        metadata.target().starts_with("cse_rs")
                    }))
                    .boxed(),
            );
        }

        tracing::subscriber::set_global_default(
            tracing_subscriber::Registry::default().with(layers),
        )
        .map_err(core_err_unexpected)?;
    }
    Ok(())
}
