use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "vpay=info,vpay_lib=info,warn";

/// Filter used by `--verbose`
pub const VERBOSE_LOG_FILTER: &str = "vpay=debug,vpay_lib=debug,warn";

/// Initialize logging with tracing
///
/// This function sets up the tracing subscriber with the following configuration:
/// - Reads filter from RUST_LOG environment variable if available
/// - Falls back to [`DEFAULT_LOG_FILTER`] (or [`VERBOSE_LOG_FILTER`]) otherwise
/// - Writes formatted output to stderr; stdout belongs to the terminal UI
///
/// Calling it more than once is harmless; later calls are ignored.
///
/// # Example
///
/// ```no_run
/// use vpay_lib::utils::logging::init_logging;
///
/// init_logging(false);
/// ```
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let initialized = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .is_ok();

    if initialized {
        tracing::debug!("VPay logging initialized");
    }
}
