use chrono::Local;
use env_logger::{Builder, Env};
use std::io::Write;

/// Default filter when `RUST_LOG` is unset: our own crate at `info`,
/// dependencies (hyper, reqwest) only when they warn.
const DEFAULT_FILTER: &str = "warn,motion_capture_rs=info,motion_capture=info,collector=info";

/// Initialise `log` output for the binaries.
///
/// Lines look like `12:04:31.250 INFO  session: Session Idle → Capturing`.
/// Calling it twice keeps the first logger.
pub fn init_logger() {
    let result = Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                short_target(record.target()),
                record.args(),
            )
        })
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialised");
    }
}

/// Last path segment of a log target (`motion_capture_rs::upload` → `upload`).
fn short_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}
