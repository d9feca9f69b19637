//! Tracing setup.
//!
//! Everything goes to the rolling `log_file` (plus stdout in text mode).
//! Events that carry a `security` or `reconciliation` field are also copied
//! to `alert_log_file`, so forged webhooks and funds needing a human can be
//! watched without grepping the main log.

use crate::config::AppConfig;
use tracing::Metadata;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, filter, fmt, prelude::*};

pub const SECURITY_FIELD: &str = "security";
pub const RECONCILIATION_FIELD: &str = "reconciliation";

/// Flush handles for the non-blocking writers. Keep alive for the lifetime
/// of the process or buffered output is lost.
pub struct LogGuards {
    _main: WorkerGuard,
    _alerts: WorkerGuard,
}

/// True for events declared with a `security` or `reconciliation` field.
pub fn is_alert(meta: &Metadata<'_>) -> bool {
    meta.is_event()
        && (meta.fields().field(SECURITY_FIELD).is_some() || meta.fields().field(RECONCILIATION_FIELD).is_some())
}

fn appender(config: &AppConfig, file: &str) -> tracing_appender::rolling::RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, file),
        _ => tracing_appender::rolling::never(&config.log_dir, file),
    }
}

pub fn init_logging(config: &AppConfig) -> LogGuards {
    let (main_writer, main_guard) = tracing_appender::non_blocking(appender(config, &config.log_file));
    let (alert_writer, alert_guard) = tracing_appender::non_blocking(appender(config, &config.alert_log_file));

    // sqlx logs every statement at info
    let filter_str = format!("{},sqlx=warn", config.log_level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let alert_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_writer(alert_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(is_alert));

    let registry = tracing_subscriber::registry().with(env_filter).with(alert_layer);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(main_writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    LogGuards {
        _main: main_guard,
        _alerts: alert_guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_alert_layer_keeps_only_flagged_events() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_filter(filter::filter_fn(is_alert)),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(reference = "DEP-1", "Deposit settled");
            tracing::warn!(security = true, provider = "mockcard", "Webhook signature rejected");
            tracing::error!(reference = "SWP-1", reconciliation = true, "Funds debited but neither credited nor returned");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(!out.contains("Deposit settled"));
        assert!(out.contains("Webhook signature rejected"));
        assert!(out.contains("Funds debited but neither credited nor returned"));
    }
}
