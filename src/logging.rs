//! Tracing subscriber setup for the `bundles` binary.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Parse a level name, falling back to `info`.
fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Log to stderr at `level`; `RUST_LOG` overrides it. Stdout stays free for
/// command output.
pub fn init_logging(level: &str) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(parse_log_level(level).into())
        .from_env_lossy();

    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
