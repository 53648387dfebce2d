use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a full filter directive, e.g.
/// `MCHI_LOG=mchi_jor=trace,mchi_transport=debug`. Overrides `--log-level`.
pub const LOG_ENV: &str = "MCHI_LOG";

/// Crates whose events `--log-level` controls. Everything else stays at
/// `warn`.
const MCHI_TARGETS: [&str; 4] = ["mchi", "mchi_transport", "mchi_frame", "mchi_jor"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Filter directive applying this level to the ring, tag and tree
    /// layers.
    pub fn directive(self) -> String {
        let level = self.as_str();
        let mut directive = String::from("warn");
        for target in MCHI_TARGETS {
            directive.push_str(&format!(",{target}={level}"));
        }
        directive
    }

    /// Per-message protocol traces come from several crates; name the source
    /// once they are visible.
    fn shows_targets(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

fn filter(level: LogLevel) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(spec) if !spec.trim().is_empty() => {
            EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new(level.directive()))
        }
        _ => EnvFilter::new(level.directive()),
    }
}

/// Install the stderr subscriber. Stdout is reserved for command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level))
        .with_ansi(false)
        .with_target(level.shows_targets());

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
