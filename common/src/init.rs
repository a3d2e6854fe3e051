use colored::Colorize;
use std::io::Write;

/// The level we log at if `RUST_LOG` isn't set. The engine crates are chatty
/// at `debug`, so keep them at `info` unless someone asks.
pub const DEFAULT_LOG_FILTER: &str = "info";

/**
 * Init logging framework with useful defaults.
 * Also sets RUST_BACKTRACE if not explicitly set in the env
 */
pub fn init_logging() {
    init_logging_with_filter(DEFAULT_LOG_FILTER);
}

/// Like `init_logging()` but with an explicit default filter, e.g.,
/// `"warn,libfirehose=debug"`. An explicit `RUST_LOG` always wins.
pub fn init_logging_with_filter(filter: &str) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", filter);
    }
    if std::env::var("RUST_BACKTRACE").is_err() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }
    // try_init() so that calling this twice (e.g., a tool that re-inits after
    // loading its config) is not fatal
    let _ = env_logger::Builder::from_default_env()
        .format(|fmt, record| {
            let level_style = fmt.default_level_style(record.level());
            let ts = fmt.timestamp_millis();
            let thread = std::thread::current();

            writeln!(
                fmt,
                "{} {} [{}] {}:{} > {}",
                ts,
                level_style.value(record.level()),
                thread.name().unwrap_or("-"),
                record.target(),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();
}

/**
 * The `panic!()` macro will only terminate the currently executing thread (or tokio
 * task) but not the rest of the process. A stats session whose ingest task died
 * would keep rendering frozen numbers forever, so abort the whole process instead.
 */
pub fn set_abort_on_panic() {
    use std::panic;
    let orig_panic_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        eprintln!("{}", format!("firehose panic: {}", panic_info).red());
        let _ = std::io::stderr().flush();
        orig_panic_hook(panic_info);
        std::process::abort();
    }));
}

pub fn firehose_init() {
    set_abort_on_panic();
    init_logging();
}

// NOTE: we need these for integration testing as well
// as unit testing, so we should not wrap with #[cfg(test)]
use std::sync::Once;
static START: Once = Once::new();

pub fn firehose_test_init() {
    // for tests, by default, only log on 'error' so 'cargo t' stays readable.
    // RUST_LOG=debug cargo t still works when chasing a specific test
    START.call_once(|| init_logging_with_filter("error"));
}
