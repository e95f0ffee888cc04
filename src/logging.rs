//! Log output setup and display names
//!
//! The log format is a plain value passed to whoever renders names; there is
//! no process-wide pretty/plain switch.

use crate::config::schema::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// How image names are rendered in progress output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Decorated names (`⛵ image app`)
    Pretty,
    /// Plain names (`image app`)
    Plain,
}

impl LogFormat {
    pub fn from_config(general: &GeneralConfig) -> Self {
        if general.pretty_log {
            Self::Pretty
        } else {
            Self::Plain
        }
    }
}

/// Display name of an image; the nameless image shows as `~`
pub fn image_log_name(name: &str, is_artifact: bool) -> &str {
    if !is_artifact && name.is_empty() {
        "~"
    } else {
        name
    }
}

/// Process title for building an image or artifact
pub fn image_log_process_name(name: &str, is_artifact: bool, format: LogFormat) -> String {
    let name = image_log_name(name, is_artifact);
    match (format, is_artifact) {
        (LogFormat::Pretty, false) => format!("⛵ image {}", name),
        (LogFormat::Pretty, true) => format!("🛸 artifact {}", name),
        (LogFormat::Plain, false) => format!("image {}", name),
        (LogFormat::Plain, true) => format!("artifact {}", name),
    }
}

/// Install the global tracing subscriber.
///
/// 0 = warn, 1 = info, 2+ = debug; `verbose = true` in config counts as 1.
/// `RUST_LOG` overrides the level. `log_format = "json"` switches to JSON lines.
pub fn init_tracing(verbosity: u8, general: &GeneralConfig) {
    let verbosity = if general.verbose {
        verbosity.max(1)
    } else {
        verbosity
    };
    let default_filter = match verbosity {
        0 => "stagehand=warn",
        1 => "stagehand=info",
        _ => "stagehand=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed (tests, embedding)
    let _ = if general.log_format == "json" {
        builder.json().with_target(true).try_init()
    } else {
        builder.with_target(false).without_time().try_init()
    };
}
