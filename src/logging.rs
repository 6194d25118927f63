use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Sets up the `tracing` subscriber, writing to stderr so the report printed by
/// `--dry-run` stays alone on stdout. `RUST_LOG` wins over `verbose` when set.
pub(crate) fn init(verbose: bool) {
    INIT_ONCE.call_once(|| {
        let default = if verbose {
            "account_report=debug"
        } else {
            "account_report=info"
        };
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
            )
            .init();
    });
}
