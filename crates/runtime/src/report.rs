//! At-exit report for weft programs
//!
//! Dumps runtime KPIs when the program finishes, controlled by the
//! `WEFT_REPORT` env var:
//! - Unset or `0` -> no report, zero cost
//! - `1` -> human-readable to stderr
//! - `json` -> JSON to stderr
//! - `json:/path` -> JSON to file
//!
//! JSON output requires the `report-json` feature (enabled by default);
//! without it a `json` request falls back to the human format with a
//! warning.
//!
//! The report is a pull: call [`emit`] once after `wait_all_strands`. The
//! CLI does this; embedders decide for themselves.

use crate::channel::{TOTAL_MESSAGES_RECEIVED, TOTAL_MESSAGES_SENT};
use crate::scheduler::{
    ACTIVE_STRANDS, PEAK_STRANDS, TOTAL_COMPLETED, TOTAL_SPAWNED, scheduler_elapsed,
};
use std::io::Write;
use std::sync::atomic::Ordering;

/// Output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

/// Parsed report configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from the WEFT_REPORT environment variable.
    pub fn from_env() -> Option<Self> {
        Self::parse(std::env::var("WEFT_REPORT").ok())
    }

    fn parse(val: Option<String>) -> Option<Self> {
        let val = val?;
        match val.as_str() {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                eprintln!("Warning: WEFT_REPORT='{}' not recognized, ignoring", val);
                None
            }
        }
    }
}

/// Collected metrics for the report
#[derive(Debug)]
#[cfg_attr(feature = "report-json", derive(serde::Serialize))]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub total_spawned: u64,
    pub total_completed: u64,
    pub peak_strands: usize,
    pub active_strands: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
}

fn collect_report_data() -> ReportData {
    ReportData {
        wall_clock_ms: scheduler_elapsed()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        total_spawned: TOTAL_SPAWNED.load(Ordering::Relaxed),
        total_completed: TOTAL_COMPLETED.load(Ordering::Relaxed),
        peak_strands: PEAK_STRANDS.load(Ordering::Relaxed),
        active_strands: ACTIVE_STRANDS.load(Ordering::Relaxed),
        messages_sent: TOTAL_MESSAGES_SENT.load(Ordering::Relaxed),
        messages_received: TOTAL_MESSAGES_RECEIVED.load(Ordering::Relaxed),
    }
}

fn format_human(data: &ReportData) -> String {
    let mut out = String::new();
    out.push_str("=== WEFT REPORT ===\n");
    out.push_str(&format!("wall clock:     {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("strands:        {} spawned, {} completed, {} peak\n",
        data.total_spawned, data.total_completed, data.peak_strands));
    out.push_str(&format!("messages:       {} sent, {} received\n",
        data.messages_sent, data.messages_received));
    out.push_str("===================\n");
    out
}

#[cfg(feature = "report-json")]
fn render_json(data: &ReportData) -> String {
    serde_json::to_string_pretty(data)
        .expect("report data serializes infallibly - plain integers only")
}

#[cfg(not(feature = "report-json"))]
fn render_json(data: &ReportData) -> String {
    eprintln!("Warning: WEFT_REPORT=json requires the report-json feature, using human format");
    format_human(data)
}

/// Emit the report if WEFT_REPORT asks for one. Call once, after
/// `wait_all_strands`.
pub fn emit() {
    let Some(config) = ReportConfig::from_env() else {
        return;
    };
    emit_with(&config);
}

/// Emit a report with an explicit configuration.
pub fn emit_with(config: &ReportConfig) {
    let data = collect_report_data();
    let body = match config.format {
        ReportFormat::Human => format_human(&data),
        ReportFormat::Json => render_json(&data),
    };
    match &config.destination {
        ReportDestination::Stderr => {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(body.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Err(e) = std::fs::write(path, &body) {
                eprintln!("Warning: could not write report to {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unset_and_off() {
        assert_eq!(ReportConfig::parse(None), None);
        assert_eq!(ReportConfig::parse(Some("0".into())), None);
        assert_eq!(ReportConfig::parse(Some(String::new())), None);
    }

    #[test]
    fn test_parse_human() {
        let config = ReportConfig::parse(Some("1".into())).expect("configured");
        assert_eq!(config.format, ReportFormat::Human);
        assert_eq!(config.destination, ReportDestination::Stderr);
    }

    #[test]
    fn test_parse_json_stderr_and_file() {
        let config = ReportConfig::parse(Some("json".into())).expect("configured");
        assert_eq!(config.format, ReportFormat::Json);
        assert_eq!(config.destination, ReportDestination::Stderr);

        let config = ReportConfig::parse(Some("json:/tmp/r.json".into())).expect("configured");
        assert_eq!(
            config.destination,
            ReportDestination::File("/tmp/r.json".into())
        );
    }

    #[test]
    fn test_parse_garbage_is_ignored() {
        assert_eq!(ReportConfig::parse(Some("yaml".into())), None);
    }

    #[test]
    fn test_human_format_names_the_kpis() {
        let data = collect_report_data();
        let text = format_human(&data);
        assert!(text.contains("strands:"));
        assert!(text.contains("messages:"));
    }

    #[test]
    #[cfg(feature = "report-json")]
    fn test_emit_json_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        let config = ReportConfig {
            format: ReportFormat::Json,
            destination: ReportDestination::File(path.display().to_string()),
        };

        emit_with(&config);

        let body = std::fs::read_to_string(&path).expect("report written");
        let parsed: serde_json::Value =
            serde_json::from_str(&body).expect("report is valid JSON");
        assert!(parsed.get("total_spawned").is_some());
        assert!(parsed.get("messages_sent").is_some());
    }
}
