use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "research_fields_bot=info,research_fields=info,telegram_bot=info";

/// Installs the global subscriber. Later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
