//! Diagnostic `tracing` output on stderr.
//!
//! `RUST_LOG` selects the filter; otherwise `-v` flags pick between info,
//! debug and trace for this crate. `RUST_LOG_FORMAT=json` switches to JSON
//! lines. The per-run log file is a separate artifact, see
//! [`crate::run_log`].

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "arx_roundtrip=info";

/// Initialize the global tracing subscriber. `-v` flags on the command line
/// raise the default level when `RUST_LOG` is unset.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with_verbosity(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => DEFAULT_FILTER,
        1 => "arx_roundtrip=debug",
        _ => "arx_roundtrip=trace",
    }
}
