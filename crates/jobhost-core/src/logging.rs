use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `default_filter`. Fails if a global subscriber is
/// already set.
pub fn init_logging(default_filter: &str) -> Result<(), TryInitError> {
    let filter: EnvFilter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_names(true)
        .with_target(true)
        .compact();

    Registry::default()
        .with(filter)
        .with(formatting_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let _ = init_logging("info");
        assert!(init_logging("debug").is_err());
    }
}
