use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in main() before any fallible operations. Safe to call
/// multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Default filter when `RUST_LOG` is unset.
fn default_filter(environment: &Environment) -> EnvFilter {
    if environment.is_production() {
        EnvFilter::new("info,redis=warn")
    } else {
        EnvFilter::new("debug,redis=info")
    }
}

/// Initialize tracing with environment-aware configuration and error span capture.
///
/// - **Production** (`APP_ENV=production`): flattened JSON events, no targets.
/// - **Development** (default): pretty, human-readable output.
///
/// Both install `tracing_error::ErrorLayer` so eyre reports carry span traces.
/// `RUST_LOG` overrides the default levels (e.g. `job_queue=trace`).
///
/// Calling this more than once is harmless; later calls are ignored, which is
/// what tests rely on.
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(environment));

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(environment = ?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_multiple_calls() {
        init_tracing(&Environment::Development);
        init_tracing(&Environment::Production);
    }

    #[test]
    fn test_init_tracing_with_rust_log_env() {
        temp_env::with_var("RUST_LOG", Some("job_queue=trace"), || {
            init_tracing(&Environment::Development);
        });
    }

    #[test]
    fn test_install_color_eyre_is_idempotent() {
        install_color_eyre();
        install_color_eyre();
    }
}
