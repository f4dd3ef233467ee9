use std::io::Write;

use env_logger::Env;

/// Filter used when `RUST_LOG` is unset. `--debug` only opens up this
/// workspace's crates; the HTTP stack stays at `warn` either way.
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "warn,copilot_completion=debug,copilot_completion_cli=debug"
    } else {
        "warn,copilot_completion=info"
    }
}

/// Logs go to stderr so `complete` output on stdout stays pipeable.
pub fn init_logging(debug: bool) {
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter(debug)))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_filter_targets_own_crates_only() {
        let filter = default_filter(true);
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("copilot_completion=debug"));
        assert!(filter.contains("copilot_completion_cli=debug"));
        assert!(!filter.contains("reqwest"));
    }

    #[test]
    fn default_filter_keeps_library_info() {
        assert_eq!(default_filter(false), "warn,copilot_completion=info");
    }
}
