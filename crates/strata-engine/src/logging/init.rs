use std::sync::Once;

/// GPU backend crates are chatty at `info`; this keeps them out of frame logs.
const QUIET_GPU_FILTER: &str = "wgpu_core=warn,wgpu_hal=warn,naga=warn";

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "strata_engine=debug,wgpu_core=warn"). When absent, `RUST_LOG` is used,
/// then `info`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Append `QUIET_GPU_FILTER` after the resolved filter.
    pub quiet_gpu_backend: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            quiet_gpu_backend: true,
        }
    }
}

static INIT: Once = Once::new();

/// Installs the global logger once. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match resolve_filter(config.env_filter, std::env::var("RUST_LOG").ok()) {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => {
                builder.filter_level(log::LevelFilter::Info);
            }
        }

        if config.quiet_gpu_backend {
            builder.parse_filters(QUIET_GPU_FILTER);
        }

        builder.write_style(config.write_style);

        // try_init: a test harness may already own the global logger.
        if builder.try_init().is_err() {
            return;
        }

        log::debug!("logging initialized");
    });
}

fn resolve_filter(explicit: Option<String>, env: Option<String>) -> Option<String> {
    explicit
        .filter(|f| !f.trim().is_empty())
        .or_else(|| env.filter(|f| !f.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins_over_env() {
        let f = resolve_filter(Some("debug".into()), Some("warn".into()));
        assert_eq!(f.as_deref(), Some("debug"));
    }

    #[test]
    fn env_filter_used_when_no_explicit() {
        let f = resolve_filter(None, Some("warn".into()));
        assert_eq!(f.as_deref(), Some("warn"));
    }

    #[test]
    fn blank_filters_fall_through() {
        assert_eq!(resolve_filter(Some("  ".into()), None), None);
        assert_eq!(resolve_filter(None, Some(String::new())), None);
    }

    #[test]
    fn init_is_idempotent() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig {
            env_filter: Some("trace".into()),
            ..LoggingConfig::default()
        });
    }
}
