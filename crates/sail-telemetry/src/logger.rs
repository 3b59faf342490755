use std::io::Write;
use std::sync::Mutex;

use log::debug;

use crate::error::{TelemetryError, TelemetryResult};

enum LoggerStatus {
    Uninitialized,
    Initialized,
    Failed,
}

static LOGGER_STATUS: Mutex<LoggerStatus> = Mutex::new(LoggerStatus::Uninitialized);

/// Installs the global logger.
/// The log level is controlled by the `RUST_LOG` environment variable and defaults to `info`.
pub fn init_logger() -> TelemetryResult<()> {
    let mut status = LOGGER_STATUS
        .lock()
        .map_err(|e| TelemetryError::internal(e.to_string()))?;

    match *status {
        LoggerStatus::Uninitialized => {
            let logger =
                env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                    .format(move |buf, record| {
                        let level = record.level();
                        let target = record.target();
                        let style = buf.default_level_style(level);
                        let timestamp = buf.timestamp();
                        let args = record.args();
                        writeln!(buf, "[{timestamp} {style}{level}{style:#} {target}] {args}")
                    })
                    .build();
            let max_level = logger.filter();
            match log::set_boxed_logger(Box::new(logger)) {
                Ok(()) => {
                    log::set_max_level(max_level);
                    debug!("logger initialized");
                    *status = LoggerStatus::Initialized;
                    Ok(())
                }
                Err(e) => {
                    *status = LoggerStatus::Failed;
                    Err(e.into())
                }
            }
        }
        LoggerStatus::Initialized => Err(TelemetryError::internal("logger already initialized")),
        LoggerStatus::Failed => Err(TelemetryError::internal(
            "logger failed to initialize previously",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_only_once() {
        // The first call may fail if another test harness installed a logger.
        let _ = init_logger();
        assert!(matches!(init_logger(), Err(TelemetryError::InternalError(_))));
    }
}
