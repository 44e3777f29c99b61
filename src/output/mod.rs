//! Output formatting module
//!
//! Renders streamed results and the final run report.

mod formatter;

pub use formatter::{
    format_discovery_errors, format_failure, write_report_to_file, OutputFormat, ResultFormatter,
};
