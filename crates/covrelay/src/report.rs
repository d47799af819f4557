//! Coverage report artifacts.
//!
//! The report step owns one file under the output directory. Any file left
//! at that path by an earlier run is removed before the tool runs, and the
//! file is only accepted after the tool exits zero and the content looks
//! like the requested format.
//!
//! ## Cobertura root element
//!
//! ```xml
//! <coverage line-rate="0.8" branch-rate="0" lines-covered="80" lines-valid="100" version="1.0">
//! ```

use crate::result::ExecutionError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Report serialization produced by the coverage tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Cobertura XML
    #[default]
    Xml,
    /// LCOV tracefile
    Lcov,
    /// Tarpaulin JSON
    Json,
    /// Standalone HTML page
    Html,
}

impl ReportFormat {
    /// Value passed to the tool's `--out` flag
    #[must_use]
    pub const fn tool_flag(self) -> &'static str {
        match self {
            Self::Xml => "Xml",
            Self::Lcov => "Lcov",
            Self::Json => "Json",
            Self::Html => "Html",
        }
    }

    /// File name the tool writes inside its output directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Xml => "cobertura.xml",
            Self::Lcov => "lcov.info",
            Self::Json => "tarpaulin-report.json",
            Self::Html => "tarpaulin-report.html",
        }
    }

    /// MIME type used when uploading
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Xml => "application/xml",
            Self::Lcov => "text/plain",
            Self::Json => "application/json",
            Self::Html => "text/html",
        }
    }

    /// A report is only accepted once it is complete: XML and HTML must
    /// end with their root closing tag, LCOV with a record terminator.
    fn validate(self, content: &str) -> Result<(), String> {
        let tail = content.trim_end();
        match self {
            Self::Xml => {
                let root = coverage_root_re()
                    .find(content)
                    .ok_or_else(|| "missing <coverage> root element".to_string())?;
                let self_closing =
                    root.as_str().ends_with("/>") && content[root.end()..].trim().is_empty();
                if self_closing || content[root.end()..].trim_end().ends_with("</coverage>") {
                    Ok(())
                } else {
                    Err("no closing </coverage> tag, report is truncated".to_string())
                }
            }
            Self::Lcov => {
                if tail.ends_with("end_of_record") {
                    Ok(())
                } else if content.contains("end_of_record") {
                    Err("last record has no end_of_record marker, report is truncated".to_string())
                } else {
                    Err("no end_of_record marker".to_string())
                }
            }
            Self::Json => serde_json::from_str::<serde_json::Value>(content)
                .map(|_| ())
                .map_err(|e| format!("not valid JSON: {e}")),
            Self::Html => {
                let lower = tail.to_ascii_lowercase();
                if !lower.contains("<html") {
                    Err("missing <html> element".to_string())
                } else if lower.ends_with("</html>") {
                    Ok(())
                } else {
                    Err("no closing </html> tag, report is truncated".to_string())
                }
            }
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Xml => "xml",
            Self::Lcov => "lcov",
            Self::Json => "json",
            Self::Html => "html",
        };
        f.write_str(name)
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" | "cobertura" => Ok(Self::Xml),
            "lcov" => Ok(Self::Lcov),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

/// Headline numbers read from a Cobertura report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Fraction of lines covered (0.0 - 1.0)
    pub line_rate: f64,
    /// Lines hit at least once
    pub lines_covered: Option<u64>,
    /// Instrumented lines
    pub lines_valid: Option<u64>,
}

impl CoverageSummary {
    /// Line coverage as a percentage
    #[must_use]
    pub fn percent(&self) -> f64 {
        self.line_rate * 100.0
    }
}

impl fmt::Display for CoverageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.percent())?;
        if let (Some(covered), Some(valid)) = (self.lines_covered, self.lines_valid) {
            write!(f, " ({covered}/{valid} lines)")?;
        }
        Ok(())
    }
}

/// A validated report file, ready for upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    /// Location on disk
    pub path: PathBuf,
    /// Serialization
    pub format: ReportFormat,
    /// Size in bytes
    pub size: u64,
    /// Hex SHA-256 of the content
    pub sha256: String,
    /// Parsed headline numbers (Cobertura only)
    pub summary: Option<CoverageSummary>,
}

/// Where the report for `format` lands inside `output_dir`
#[must_use]
pub fn report_path(output_dir: &Path, format: ReportFormat) -> PathBuf {
    output_dir.join(format.file_name())
}

/// Create the output directory and remove any stale report in it
///
/// # Errors
///
/// Returns error if the directory cannot be created or the stale file removed
pub fn prepare_target(output_dir: &Path, format: ReportFormat) -> Result<PathBuf, ExecutionError> {
    std::fs::create_dir_all(output_dir)?;
    let path = report_path(output_dir, format);
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale report"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(path)
}

/// Validate the report the tool wrote and describe it
///
/// # Errors
///
/// Returns error if the file is missing, empty, or not in the expected format
pub fn collect(path: &Path, format: ReportFormat) -> Result<ReportArtifact, ExecutionError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExecutionError::MissingReport {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    if bytes.is_empty() {
        return Err(ExecutionError::invalid_report(path, "file is empty"));
    }

    let content = String::from_utf8_lossy(&bytes);
    format
        .validate(&content)
        .map_err(|reason| ExecutionError::invalid_report(path, reason))?;

    let summary = match format {
        ReportFormat::Xml => {
            let summary = parse_cobertura_summary(&content);
            if summary.is_none() {
                tracing::warn!(path = %path.display(), "could not read line-rate from report");
            }
            summary
        }
        _ => None,
    };

    Ok(ReportArtifact {
        path: path.to_path_buf(),
        format,
        size: bytes.len() as u64,
        sha256: format!("{:x}", Sha256::digest(&bytes)),
        summary,
    })
}

#[allow(clippy::expect_used)]
fn coverage_root_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<coverage\b([^>]*)>").expect("literal regex"))
}

#[allow(clippy::expect_used)]
fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("literal regex")
    })
}

/// Read the headline numbers from the `<coverage>` root of a Cobertura report
#[must_use]
pub fn parse_cobertura_summary(xml: &str) -> Option<CoverageSummary> {
    let attrs = coverage_root_re().captures(xml)?.get(1)?.as_str();

    let mut line_rate = None;
    let mut lines_covered = None;
    let mut lines_valid = None;

    for cap in attribute_re().captures_iter(attrs) {
        let value = &cap[2];
        match &cap[1] {
            "line-rate" => line_rate = value.parse::<f64>().ok(),
            "lines-covered" => lines_covered = value.parse().ok(),
            "lines-valid" => lines_valid = value.parse().ok(),
            _ => {}
        }
    }

    Some(CoverageSummary {
        line_rate: line_rate?,
        lines_covered,
        lines_valid,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE coverage SYSTEM "http://cobertura.sourceforge.net/xml/coverage-04.dtd">
<coverage lines-covered="412" lines-valid="500" line-rate="0.824" branch-rate="0" version="1.9" timestamp="1700000000">
  <packages/>
</coverage>
"#;

    mod format_tests {
        use super::*;

        #[test]
        fn test_default_is_cobertura() {
            assert_eq!(ReportFormat::default(), ReportFormat::Xml);
            assert_eq!(ReportFormat::Xml.file_name(), "cobertura.xml");
            assert_eq!(ReportFormat::Xml.tool_flag(), "Xml");
        }

        #[test]
        fn test_from_str_aliases() {
            assert_eq!("cobertura".parse::<ReportFormat>().unwrap(), ReportFormat::Xml);
            assert_eq!("LCOV".parse::<ReportFormat>().unwrap(), ReportFormat::Lcov);
            assert!("pdf".parse::<ReportFormat>().is_err());
        }

        #[test]
        fn test_serde_lowercase() {
            let json = serde_json::to_string(&ReportFormat::Json).unwrap();
            assert_eq!(json, "\"json\"");
            let back: ReportFormat = serde_json::from_str("\"html\"").unwrap();
            assert_eq!(back, ReportFormat::Html);
        }
    }

    mod summary_tests {
        use super::*;

        #[test]
        fn test_parse_sample() {
            let summary = parse_cobertura_summary(SAMPLE).unwrap();
            assert_eq!(summary.line_rate, 0.824);
            assert_eq!(summary.lines_covered, Some(412));
            assert_eq!(summary.lines_valid, Some(500));
            assert_eq!(summary.to_string(), "82.40% (412/500 lines)");
        }

        #[test]
        fn test_parse_without_line_rate() {
            assert!(parse_cobertura_summary(r#"<coverage version="1"></coverage>"#).is_none());
        }

        #[test]
        fn test_parse_not_cobertura() {
            assert!(parse_cobertura_summary("<report/>").is_none());
        }
    }

    mod collect_tests {
        use super::*;

        #[test]
        fn test_prepare_removes_stale_report() {
            let temp = TempDir::new().unwrap();
            let out = temp.path().join("cov");
            std::fs::create_dir_all(&out).unwrap();
            std::fs::write(out.join("cobertura.xml"), SAMPLE).unwrap();

            let path = prepare_target(&out, ReportFormat::Xml).unwrap();
            assert_eq!(path, out.join("cobertura.xml"));
            assert!(!path.exists());
        }

        #[test]
        fn test_prepare_creates_directory() {
            let temp = TempDir::new().unwrap();
            let out = temp.path().join("a/b/c");
            let path = prepare_target(&out, ReportFormat::Lcov).unwrap();
            assert!(out.is_dir());
            assert_eq!(path.file_name().unwrap(), "lcov.info");
        }

        #[test]
        fn test_collect_valid_xml() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("cobertura.xml");
            std::fs::write(&path, SAMPLE).unwrap();

            let artifact = collect(&path, ReportFormat::Xml).unwrap();
            assert_eq!(artifact.size, SAMPLE.len() as u64);
            assert_eq!(artifact.sha256.len(), 64);
            assert_eq!(artifact.summary.unwrap().lines_covered, Some(412));
        }

        #[test]
        fn test_collect_missing() {
            let temp = TempDir::new().unwrap();
            let err = collect(&temp.path().join("cobertura.xml"), ReportFormat::Xml).unwrap_err();
            assert!(matches!(err, ExecutionError::MissingReport { .. }));
        }

        #[test]
        fn test_collect_empty() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("cobertura.xml");
            std::fs::write(&path, "").unwrap();
            let err = collect(&path, ReportFormat::Xml).unwrap_err();
            assert!(err.to_string().contains("empty"));
        }

        #[test]
        fn test_collect_truncated_xml() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("cobertura.xml");
            std::fs::write(&path, "<?xml version=\"1.0\"?>\n<!DOCTYPE").unwrap();
            let err = collect(&path, ReportFormat::Xml).unwrap_err();
            assert!(matches!(err, ExecutionError::InvalidReport { .. }));
        }

        #[test]
        fn test_collect_xml_cut_off_mid_element() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("cobertura.xml");
            let cut = "<?xml version=\"1.0\"?>\n<coverage line-rate=\"0.8\" version=\"1\">\n  <packages>\n    <package name=\"cra";
            std::fs::write(&path, cut).unwrap();
            let err = collect(&path, ReportFormat::Xml).unwrap_err();
            assert!(matches!(err, ExecutionError::InvalidReport { .. }));
            assert!(err.to_string().contains("truncated"));
        }

        #[test]
        fn test_collect_self_closing_coverage_root() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("cobertura.xml");
            std::fs::write(&path, "<coverage line-rate=\"1\" version=\"1\"/>\n").unwrap();
            assert!(collect(&path, ReportFormat::Xml).is_ok());
        }

        #[test]
        fn test_collect_lcov_cut_off_mid_record() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("lcov.info");
            std::fs::write(&path, "SF:a.rs\nDA:1,1\nend_of_record\nSF:b.rs\nDA:1,").unwrap();
            let err = collect(&path, ReportFormat::Lcov).unwrap_err();
            assert!(err.to_string().contains("truncated"));
        }

        #[test]
        fn test_collect_html_without_closing_tag() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("tarpaulin-report.html");
            std::fs::write(&path, "<!DOCTYPE html><html><body>").unwrap();
            assert!(collect(&path, ReportFormat::Html).is_err());

            std::fs::write(&path, "<!DOCTYPE html><HTML><body></body></HTML>\n").unwrap();
            assert!(collect(&path, ReportFormat::Html).is_ok());
        }

        #[test]
        fn test_collect_json_checks_syntax() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("tarpaulin-report.json");
            std::fs::write(&path, "{\"files\": [").unwrap();
            assert!(collect(&path, ReportFormat::Json).is_err());

            std::fs::write(&path, "{\"files\": []}").unwrap();
            let artifact = collect(&path, ReportFormat::Json).unwrap();
            assert!(artifact.summary.is_none());
        }

        #[test]
        fn test_collect_lcov() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("lcov.info");
            std::fs::write(&path, "TN:\nSF:src/lib.rs\nDA:1,1\nend_of_record\n").unwrap();
            assert!(collect(&path, ReportFormat::Lcov).is_ok());
        }
    }
}
