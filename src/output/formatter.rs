//! Output formatters for run results
//!
//! Provides table, JSON, CSV and one-line summary formats.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::error::DiscoveryError;
use crate::executor::{RunOutcome, RunSummary};
use crate::models::{Outcome, TeardownFailure, TestResult};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }

    /// Formats that can print a line per result as it completes
    pub fn streams(&self) -> bool {
        matches!(self, OutputFormat::Table | OutputFormat::Summary)
    }
}

#[derive(Serialize)]
struct ReportJson<'a> {
    started_at: &'a DateTime<Utc>,
    finished_at: &'a DateTime<Utc>,
    summary: &'a RunSummary,
    results: Vec<&'a TestResult>,
    session_teardown_failures: &'a [TeardownFailure],
    discovery_errors: &'a [DiscoveryError],
}

const CSV_HEADER: [&str; 9] = [
    "seq",
    "id",
    "outcome",
    "duration_ms",
    "kind",
    "message",
    "actual",
    "expected",
    "markers",
];

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format a single test result
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Table => self.format_result_table(result),
            OutputFormat::Json => serde_json::to_string(result).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Csv => csv_rows(&[result], false).trim_end().to_string(),
            OutputFormat::Summary => format!("{} {}", result.outcome.symbol(), result.id),
        }
    }

    fn status(&self, outcome: Outcome) -> &'static str {
        match (outcome, self.colorize) {
            (Outcome::Passed, true) => "\x1b[32m✓ PASS \x1b[0m",
            (Outcome::Failed, true) => "\x1b[31m✗ FAIL \x1b[0m",
            (Outcome::Errored, true) => "\x1b[31m! ERROR\x1b[0m",
            (Outcome::Passed, false) => "✓ PASS ",
            (Outcome::Failed, false) => "✗ FAIL ",
            (Outcome::Errored, false) => "! ERROR",
        }
    }

    fn red_if_nonzero(&self, count: usize) -> String {
        if self.colorize && count > 0 {
            format!("\x1b[31m{count}\x1b[0m")
        } else {
            count.to_string()
        }
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{} {} [{:>6}ms]",
            self.status(result.outcome),
            result.id,
            result.duration_ms
        );
        if let Some(failure) = &result.failure {
            line.push_str(&format!(" - {failure}"));
        }
        line
    }

    /// Format the finished run
    pub fn format_report(&self, outcome: &RunOutcome) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(outcome),
            OutputFormat::Json => serde_json::to_string(&report_json(outcome)).unwrap_or_default(),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(&report_json(outcome)).unwrap_or_default()
            }
            OutputFormat::Csv => csv_rows(&outcome.report.by_submission(), true),
            OutputFormat::Summary => format_summary_brief(outcome),
        }
    }

    fn format_report_table(&self, outcome: &RunOutcome) -> String {
        let report = &outcome.report;
        let mut output = String::new();

        let failures = report.failures();
        if !failures.is_empty() {
            output.push_str("\n════════════════════════════ FAILURES ════════════════════════════\n");
            for result in failures {
                output.push_str(&format_failure(result));
            }
        }

        if !report.session_teardown_failures.is_empty() {
            output.push_str("\nSession teardown errors:\n");
            for failure in &report.session_teardown_failures {
                output.push_str(&format!("  {failure}\n"));
            }
        }

        output.push_str(&format_discovery_errors(&outcome.discovery_errors));

        let summary = &report.summary;
        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = self.red_if_nonzero(summary.failed);
        let error_str = self.red_if_nonzero(summary.errored);

        output.push_str("\n══════════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            "  Total: {} | Pass: {} | Fail: {} | Error: {}\n",
            summary.total, pass_str, fail_str, error_str
        ));
        output.push_str(&format!(
            "  Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.duration_ms
        ));
        if summary.fixture_teardown_failed > 0 || summary.session_teardown_failed > 0 {
            output.push_str(&format!(
                "  Teardown errors: {} unit(s), {} session fixture(s)\n",
                summary.fixture_teardown_failed, summary.session_teardown_failed
            ));
        }
        if summary.abandoned > 0 {
            output.push_str(&format!("  Abandoned: {}\n", summary.abandoned));
        }
        output.push_str("══════════════════════════════════════════════════════════════════\n");
        output
    }

    /// Format the expanded identifiers of a `--list` run
    pub fn format_listing(&self, ids: &[String]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(ids).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(ids).unwrap_or_default(),
            _ => {
                let mut output = ids.join("\n");
                output.push_str(&format!("\n\n{} unit(s)\n", ids.len()));
                output
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn report_json(outcome: &RunOutcome) -> ReportJson<'_> {
    let report = &outcome.report;
    ReportJson {
        started_at: &report.started_at,
        finished_at: &report.finished_at,
        summary: &report.summary,
        results: report.by_submission(),
        session_teardown_failures: &report.session_teardown_failures,
        discovery_errors: &outcome.discovery_errors,
    }
}

/// Detail block for one failed or errored unit
pub fn format_failure(result: &TestResult) -> String {
    let mut output = format!("\n── {} ──\n", result.id);
    if let Some(failure) = &result.failure {
        output.push_str(&format!("  {}: {}\n", failure.kind, failure.message));
        if let Some(fixture) = &failure.fixture {
            output.push_str(&format!("  fixture:  {fixture}\n"));
        }
        if let Some(actual) = &failure.actual {
            output.push_str(&format!("  actual:   {actual}\n"));
        }
        if let Some(expected) = &failure.expected {
            output.push_str(&format!("  expected: {expected}\n"));
        }
        if let Some(origin) = &failure.origin {
            output.push_str(&format!("  origin:   {origin}\n"));
        }
    }
    for teardown in &result.teardown_failures {
        output.push_str(&format!("  {teardown}\n"));
    }
    if !result.output.stdout.is_empty() {
        output.push_str("  ---- captured stdout ----\n");
        for line in result.output.stdout.lines() {
            output.push_str(&format!("  {line}\n"));
        }
    }
    if !result.output.stderr.is_empty() {
        output.push_str("  ---- captured stderr ----\n");
        for line in result.output.stderr.lines() {
            output.push_str(&format!("  {line}\n"));
        }
    }
    output
}

pub fn format_discovery_errors(errors: &[DiscoveryError]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let mut output = String::from("\nDiscovery errors:\n");
    for err in errors {
        output.push_str(&format!("  {}: {err}\n", err.kind()));
    }
    output
}

fn format_summary_brief(outcome: &RunOutcome) -> String {
    let summary = &outcome.report.summary;
    let mut line = format!(
        "{}/{} passed ({:.1}%), {} failed, {} errored in {}ms",
        summary.passed,
        summary.total,
        summary.pass_rate(),
        summary.failed,
        summary.errored,
        summary.duration_ms
    );
    if !outcome.discovery_errors.is_empty() {
        line.push_str(&format!(", {} discovery error(s)", outcome.discovery_errors.len()));
    }
    line
}

fn csv_rows(results: &[&TestResult], header: bool) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut write = || -> csv::Result<()> {
        if header {
            writer.write_record(CSV_HEADER)?;
        }
        for result in results {
            let failure = result.failure.as_ref();
            writer.write_record([
                result.seq.to_string(),
                result.id.clone(),
                result.outcome.to_string(),
                result.duration_ms.to_string(),
                failure.map(|f| f.kind.to_string()).unwrap_or_default(),
                failure.map(|f| f.message.clone()).unwrap_or_default(),
                failure.and_then(|f| f.actual.clone()).unwrap_or_default(),
                failure.and_then(|f| f.expected.clone()).unwrap_or_default(),
                result.markers.join(" "),
            ])?;
        }
        writer.flush()?;
        Ok(())
    };
    if write().is_err() {
        return String::new();
    }
    writer
        .into_inner()
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Write the finished run to a file
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    outcome: &RunOutcome,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(outcome);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ResultAggregator;
    use crate::models::{FailureDetail, FailureKind};

    fn outcome() -> RunOutcome {
        let mut aggregator = ResultAggregator::new();
        aggregator.record(TestResult::passed("t.rs::test_ok", 0, 4).with_markers(vec!["fast".into()]));
        aggregator.record(TestResult::failed(
            "t.rs::test_eq[1]",
            1,
            2,
            FailureDetail::new(FailureKind::Assertion, "1 != 2, said \"no\"")
                .with_values(Some("1".into()), Some("2".into())),
        ));
        RunOutcome {
            report: aggregator.finalize(Vec::new()),
            discovery_errors: vec![DiscoveryError::DuplicateTest {
                test: "t.rs::test_ok".into(),
            }],
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("json-pretty"), Some(OutputFormat::JsonPretty));
        assert_eq!(OutputFormat::from_str("unknown"), None);
        assert!(OutputFormat::Table.streams());
        assert!(!OutputFormat::Json.streams());
    }

    #[test]
    fn test_format_result_table() {
        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let result = TestResult::passed("t.rs::test_ok", 0, 12);
        assert_eq!(formatter.format_result(&result), "✓ PASS  t.rs::test_ok [    12ms]");
    }

    #[test]
    fn test_table_report_lists_failures_and_errors() {
        let text = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_report(&outcome());
        assert!(text.contains("── t.rs::test_eq[1] ──"));
        assert!(text.contains("expected: 2"));
        assert!(text.contains("discovery_config_error: t.rs::test_ok: registered more than once"));
        assert!(text.contains("Total: 2 | Pass: 1 | Fail: 1 | Error: 0"));
    }

    #[test]
    fn test_colored_summary_marks_each_nonzero_count() {
        let mut aggregator = ResultAggregator::new();
        aggregator.record(TestResult::passed("t.rs::test_ok", 0, 1));
        aggregator.record(TestResult::errored(
            "t.rs::test_io",
            1,
            1,
            FailureDetail::new(FailureKind::UnexpectedException, "disk gone"),
        ));
        let errored_only = RunOutcome {
            report: aggregator.finalize(Vec::new()),
            discovery_errors: Vec::new(),
        };

        let text = ResultFormatter::new(OutputFormat::Table).format_report(&errored_only);
        assert!(text.contains("Fail: 0 | Error: \x1b[31m1\x1b[0m"));

        let text = ResultFormatter::new(OutputFormat::Table).format_report(&outcome());
        assert!(text.contains("Fail: \x1b[31m1\x1b[0m | Error: 0"));
    }

    #[test]
    fn test_json_report_shape() {
        let text = ResultFormatter::new(OutputFormat::Json).format_report(&outcome());
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["summary"]["total"], 2);
        assert_eq!(value["results"][0]["markers"][0], "fast");
        assert_eq!(value["results"][1]["failure"]["kind"], "assertion");
        assert_eq!(value["discovery_errors"][0]["kind"], "duplicate_test");
    }

    #[test]
    fn test_csv_report_quotes_fields() {
        let text = ResultFormatter::new(OutputFormat::Csv).format_report(&outcome());
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][1], "t.rs::test_eq[1]");
        assert_eq!(&rows[1][5], "1 != 2, said \"no\"");
        assert_eq!(&rows[0][8], "fast");
    }

    #[test]
    fn test_summary_and_listing() {
        let formatter = ResultFormatter::new(OutputFormat::Summary);
        assert_eq!(
            formatter.format_report(&outcome()).split(" in ").next(),
            Some("1/2 passed (50.0%), 1 failed, 0 errored")
        );
        let listing = formatter.format_listing(&["a".into(), "b".into()]);
        assert!(listing.starts_with("a\nb\n"));
        assert!(listing.ends_with("2 unit(s)\n"));
    }
}
