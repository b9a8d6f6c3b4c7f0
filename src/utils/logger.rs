//! Logging utilities

use crate::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Initialize logging with a console layer and a daily-rolling file layer
pub fn init<P: AsRef<Path>>(log_level: &str, log_file: P) -> Result<()> {
    if let Some(parent) = log_file.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_file.as_ref().parent().unwrap_or(Path::new(".")),
        log_file
            .as_ref()
            .file_name()
            .unwrap_or(std::ffi::OsStr::new("arb-engine.log")),
    );

    let console_layer = fmt::layer().with_target(true);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Log an opportunity with structured fields
#[macro_export]
macro_rules! log_opportunity {
    ($level:ident, $kind:expr, $net_pct:expr, $trade_value:expr, $($field:tt)*) => {
        tracing::$level!(
            kind = %$kind,
            net_pct = %$net_pct,
            trade_value = %$trade_value,
            $($field)*
        );
    };
}

/// Log allocation drift with structured fields
#[macro_export]
macro_rules! log_drift {
    ($level:ident, $asset:expr, $current:expr, $target:expr, $deviation:expr, $($field:tt)*) => {
        tracing::$level!(
            asset = %$asset,
            current_pct = %$current,
            target_pct = %$target,
            deviation = %$deviation,
            $($field)*
        );
    };
}
