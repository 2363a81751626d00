//! Telemetry initialization and configuration

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Initialize console logging
///
/// Logs go to stderr. Only the first call in a process installs a
/// subscriber; later calls are no-ops, as are calls made after another
/// global subscriber was set.
///
/// # Arguments
/// * `service_name` - Name of the service, recorded on the first event
///
/// # Example
/// ```
/// use mmlive_telemetry::init_telemetry;
/// init_telemetry("mmlive").expect("Failed to initialize telemetry");
/// ```
pub fn init_telemetry(service_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    init_with_filter(service_name, DEFAULT_FILTER)
}

/// Initialize console logging on stderr with a custom default filter
///
/// `RUST_LOG` still takes precedence. Interactive tools use this to keep
/// stdout free for their own output.
///
/// # Example
/// ```
/// use mmlive_telemetry::init_with_filter;
/// init_with_filter("mmlive", "warn,mmlive_realtime=info").expect("Failed to initialize telemetry");
/// ```
pub fn init_with_filter(
    service_name: &str,
    default_directive: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    INIT.call_once(|| {
        let installed = tracing_subscriber::registry()
            .with(env_filter(default_directive))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init();

        if installed.is_ok() {
            tracing::info!(service.name = service_name, "Telemetry initialized");
        }
    });

    Ok(())
}

/// Initialize JSON logging, one object per line
///
/// Suited to log shippers. Shares the once-per-process guard with
/// [`init_telemetry`].
///
/// # Example
/// ```
/// use mmlive_telemetry::init_json_telemetry;
/// init_json_telemetry("mmlive").expect("Failed to initialize telemetry");
/// ```
pub fn init_json_telemetry(service_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    INIT.call_once(|| {
        let installed = tracing_subscriber::registry()
            .with(env_filter(DEFAULT_FILTER))
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init();

        if installed.is_ok() {
            tracing::info!(service.name = service_name, format = "json", "Telemetry initialized");
        }
    });

    Ok(())
}
