//! Logging setup and the health report served on `/health`.

use std::io;

use serde::Serialize;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for development.
    Pretty,
    /// One JSON object per line for log aggregation.
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT` (`json` or `pretty`, default `pretty`).
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    /// Parses a format name case-insensitively; anything unknown is pretty.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Spans log on
/// close so request timings show up, and everything goes to stderr. Audit
/// events arrive on the `audit` target and can be routed with
/// `RUST_LOG=audit=info`.
///
/// # Examples
///
/// ```no_run
/// use textval_server::observability::{LogFormat, init_observability};
///
/// init_observability(LogFormat::from_env());
/// ```
pub fn init_observability(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
    }
}

/// Overall service health.
///
/// Startup checks that fail abort the process, so a running server is
/// never worse than degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every check passed.
    Healthy,
    /// Serving, with at least one warning.
    Degraded,
}

/// Result of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckStatus {
    /// Check passed.
    Pass,
    /// Degraded but operational.
    Warn,
}

/// One named check with an optional detail.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Check name.
    pub name: String,
    /// Outcome.
    pub status: HealthCheckStatus,
    /// Detail for operators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// A passing check with a detail.
    #[must_use]
    pub fn pass_with_message(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), status: HealthCheckStatus::Pass, message: Some(message.into()) }
    }

    /// A check that passed with a caveat.
    #[must_use]
    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), status: HealthCheckStatus::Warn, message: Some(message.into()) }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among the checks.
    pub status: HealthStatus,
    /// Crate version of the server.
    pub version: &'static str,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Individual checks.
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Builds a report whose status is derived from `checks`.
    #[must_use]
    pub fn new(uptime_secs: u64, checks: Vec<HealthCheck>) -> Self {
        Self {
            status: Self::compute_status(&checks),
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs,
            checks,
        }
    }

    /// Any warning is degraded.
    #[must_use]
    pub fn compute_status(checks: &[HealthCheck]) -> HealthStatus {
        if checks.iter().any(|c| c.status == HealthCheckStatus::Warn) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("unknown")), LogFormat::Pretty);
    }

    #[test]
    fn test_health_status_compute() {
        let pass = HealthCheck::pass_with_message("plan_registry", "5 plans");
        let warn = HealthCheck::warn("store", "in-memory backend, state is not persisted");

        assert_eq!(HealthReport::compute_status(&[]), HealthStatus::Healthy);
        assert_eq!(HealthReport::compute_status(&[pass.clone()]), HealthStatus::Healthy);
        assert_eq!(HealthReport::compute_status(&[pass.clone(), warn.clone()]), HealthStatus::Degraded);
        assert_eq!(HealthReport::compute_status(&[warn, pass]), HealthStatus::Degraded);
    }

    #[test]
    fn test_health_report_json() {
        let report = HealthReport::new(
            3600,
            vec![
                HealthCheck::pass_with_message("plan_registry", "5 plans"),
                HealthCheck::warn("store", "in-memory backend"),
            ],
        );

        let json = serde_json::to_value(&report).expect("serializable");
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["uptime_secs"], 3600);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["checks"][0]["name"], "plan_registry");
        assert_eq!(json["checks"][0]["status"], "pass");
        assert_eq!(json["checks"][1]["message"], "in-memory backend");
    }
}
