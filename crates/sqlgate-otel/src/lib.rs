//! Tracing subscriber setup: console output filtered by `RUST_LOG` and an
//! optional rolling file that receives only `http.access` events. Also owns
//! the process-wide Prometheus recorder behind the `metrics` facade.

use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static METRICS: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

/// Counters the service records, with their help text.
pub const COUNTERS: [(&str, &str); 4] = [
    (
        "sqlgate_guardrail_blocked_total",
        "Statements refused by the guardrail",
    ),
    (
        "sqlgate_generation_degraded_total",
        "Generations that fell back to the inert statement",
    ),
    (
        "sqlgate_normalize_fallback_total",
        "Schema normalizations that kept the raw structure",
    ),
    (
        "sqlgate_audit_failures_total",
        "History writes that failed or timed out",
    ),
];

/// Target used by the HTTP access-log middleware.
pub const ACCESS_TARGET: &str = "http.access";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessLogFile {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLogFile {
    /// Reads `SQLGATE_ACCESS_LOG_ROLL`; only `1` enables the file.
    pub fn from_lookup<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if env("SQLGATE_ACCESS_LOG_ROLL").as_deref() != Some("1") {
            return None;
        }
        let dir = env("SQLGATE_ACCESS_LOG_DIR").unwrap_or_else(|| "logs".to_string());
        let prefix = env("SQLGATE_ACCESS_LOG_PREFIX").unwrap_or_else(|| "http-access".into());
        let rotation = match env("SQLGATE_ACCESS_LOG_ROTATION")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        };
        Some(Self {
            dir: PathBuf::from(dir),
            prefix,
            rotation,
        })
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let access = AccessLogFile::from_lookup(|key| std::env::var(key).ok());
    install_console(filter, access);
    let _ = metrics_handle();
}

/// Installs the Prometheus recorder on first use and returns its handle.
/// `None` when some other recorder already holds the global slot.
pub fn metrics_handle() -> Option<PrometheusHandle> {
    METRICS
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                for (name, help) in COUNTERS {
                    metrics::describe_counter!(name, help);
                    metrics::counter!(name).absolute(0);
                }
                Some(handle)
            }
            Err(err) => {
                tracing::warn!(error = %err, "metrics recorder not installed");
                None
            }
        })
        .clone()
}

fn install_console(filter: EnvFilter, access: Option<AccessLogFile>) {
    let fmt_layer = fmt::layer();
    let registry = tracing_subscriber::registry().with(fmt_layer.with_filter(filter));
    let Some(access) = access else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&access.dir).is_err() {
        tracing::warn!(directory = %access.dir.display(), "failed to create access log directory");
    }
    let writer = match access.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&access.dir, &access.prefix),
        Rotation::Minutely => tracing_appender::rolling::minutely(&access.dir, &access.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&access.dir, &access.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = ACCESS_GUARD.set(guard);
    let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
    let access_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(access_layer).try_init();
}
