//! Process-wide tracing setup and the span every task dispatch logs under.

use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::task::TaskId;

static INIT: OnceCell<()> = OnceCell::new();

/// Our crates at `info`, dependencies (reqwest, hyper, polars) only at `warn`.
pub const DEFAULT_FILTER: &str = "warn,batchrun_core=info,batchrun_client=info,batchrun=info";

const OWN_TARGETS: [&str; 3] = ["batchrun_core", "batchrun_client", "batchrun"];

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    /// JSONL output file; console (stderr) output otherwise.
    pub json_path: Option<PathBuf>,
}

impl LogSettings {
    /// Reads `BATCHRUN_OBSERVABILITY_ENABLED`, `BATCHRUN_LOG_LEVEL` (then
    /// `RUST_LOG`) and `BATCHRUN_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("BATCHRUN_OBSERVABILITY_ENABLED")
            .and_then(|v| parse_bool_env(&v))
            .unwrap_or(true);
        let filter = ["BATCHRUN_LOG_LEVEL", "RUST_LOG"]
            .iter()
            .filter_map(|key| lookup(key))
            .find_map(|raw| resolve_filter(raw.trim()))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json_path = lookup("BATCHRUN_JSON_LOG_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            filter,
            json_path,
        }
    }
}

/// A bare level (`debug`) applies to our crates only and keeps dependencies
/// at `warn`; anything else is taken as full directives. Invalid input is
/// `None`.
fn resolve_filter(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.parse::<LevelFilter>().is_ok() {
        let level = raw.to_ascii_lowercase();
        let own = OWN_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        return Some(format!("warn,{own}"));
    }
    EnvFilter::try_new(raw).ok().map(|_| raw.to_string())
}

/// Span wrapping one task dispatch; every event logged while the task
/// streams carries these fields.
pub fn task_span(workflow_id: &str, generation: u64, task_id: TaskId) -> tracing::Span {
    tracing::info_span!("task", workflow_id, generation, task_id)
}

/// Initialize logging once per process from [`LogSettings::from_env`].
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

/// Initialize logging once per process. Later calls are ignored.
pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let env_filter =
            EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        match &settings.json_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    let _ = std::fs::create_dir_all(parent);
                }
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("batchrun.logs.jsonl");
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                // stdout carries the CLI's progress lines
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn parses_common_bool_spellings() {
        assert_eq!(parse_bool_env(" Yes "), Some(true));
        assert_eq!(parse_bool_env("off"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn defaults_keep_dependencies_quiet() {
        let s = settings(&[]);
        assert!(s.enabled);
        assert_eq!(s.filter, DEFAULT_FILTER);
        assert_eq!(s.json_path, None);
    }

    #[test]
    fn bare_level_applies_to_own_crates_only() {
        let s = settings(&[("BATCHRUN_LOG_LEVEL", "debug")]);
        assert_eq!(
            s.filter,
            "warn,batchrun_core=debug,batchrun_client=debug,batchrun=debug"
        );
    }

    #[test]
    fn directives_pass_through_and_invalid_falls_back_to_rust_log() {
        let s = settings(&[("BATCHRUN_LOG_LEVEL", "reqwest=trace")]);
        assert_eq!(s.filter, "reqwest=trace");

        let s = settings(&[
            ("BATCHRUN_LOG_LEVEL", "batchrun_core=loud"),
            ("RUST_LOG", "info"),
        ]);
        assert_eq!(
            s.filter,
            "warn,batchrun_core=info,batchrun_client=info,batchrun=info"
        );
    }

    #[test]
    fn json_path_and_disable_flag() {
        let s = settings(&[
            ("BATCHRUN_OBSERVABILITY_ENABLED", "off"),
            ("BATCHRUN_JSON_LOG_PATH", " logs/run.jsonl "),
        ]);
        assert!(!s.enabled);
        assert_eq!(s.json_path, Some(PathBuf::from("logs/run.jsonl")));
    }
}
