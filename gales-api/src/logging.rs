use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "gales=info,gales_api=info,actix_web=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Calling this more than once is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
