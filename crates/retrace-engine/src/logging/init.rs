use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "retrace_engine=trace,wgpu_core=warn"). When unset, `RUST_LOG` is used.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Include the module path of each record. Useful when tracing replays.
    pub module_path: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            module_path: false,
        }
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once.
///
/// Subsequent calls are ignored, so tests may call this freely.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter.as_deref() {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            // wgpu is chatty at info; keep it at warn unless asked.
            builder.filter_level(log::LevelFilter::Info);
            builder.filter_module("wgpu_core", log::LevelFilter::Warn);
            builder.filter_module("wgpu_hal", log::LevelFilter::Warn);
        }

        builder.write_style(config.write_style);
        builder.format_module_path(config.module_path);
        builder.format_target(false);

        // `try_init` so a logger installed by a test harness is not an error.
        if builder.try_init().is_err() {
            return;
        }

        log::debug!("logging initialized");
    });
}

/// Maps a `-v` count to an env_logger filter string.
pub fn filter_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "info,wgpu_core=warn,wgpu_hal=warn",
        1 => "debug,wgpu_core=warn,wgpu_hal=warn",
        _ => "trace,wgpu_core=info,wgpu_hal=info",
    }
}
