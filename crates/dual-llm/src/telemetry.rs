// dual-llm/crates/dual-llm/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset, by `-v` count. HTTP internals stay
/// at warn until full tracing is asked for.
fn default_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info,hyper=warn,reqwest=warn",
        1 => "debug,hyper=warn,reqwest=warn",
        _ => "trace",
    }
}

fn build_filter(rust_log: Option<&str>, verbosity: u8) -> EnvFilter {
    rust_log
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(verbosity)))
}

/// Install the global fmt subscriber on stderr; stdout belongs to results.
/// `RUST_LOG` wins over `verbosity`. Safe to call more than once.
pub fn init_tracing(verbosity: u8) {
    let rust_log = std::env::var("RUST_LOG").ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(rust_log.as_deref(), verbosity))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(verbosity > 0)
        .with_level(true)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
