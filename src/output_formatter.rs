use crate::deps::DependencyFinding;
use crate::errors::Result;
use crate::outcome::{FileScanFailure, FileScanResult, ScanOutcome};
use crate::rules::{ReplacementKind, ReplacementRule};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

/// Defines the possible output formats for scan reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// One suggestion block per finding.
    Text,
    /// JSON format, suitable for machine processing.
    Json,
    /// Comma-Separated Values format.
    Csv,
    /// Static Analysis Results Interchange Format, for code-scanning integrations.
    Sarif,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            "sarif" => OutputFormat::Sarif,
            _ => OutputFormat::Text,
        }
    }
}

/// Everything a report is built from.
pub struct Report<'a> {
    pub dependencies: &'a [DependencyFinding],
    pub outcome: &'a ScanOutcome,
}

impl Report<'_> {
    /// Every occurrence, flattened, in result order.
    fn occurrences(&self) -> impl Iterator<Item = (&FileScanResult, &ReplacementRule, usize, usize, &str)> {
        self.outcome.results.iter().flat_map(|result| {
            result.matches.iter().flat_map(move |m| {
                m.occurrences
                    .iter()
                    .map(move |o| (result, &m.rule, o.line, o.column, o.snippet.as_str()))
            })
        })
    }
}

/// Handles the formatting of scan reports into various output formats.
pub struct OutputFormatter {
    format: OutputFormat,
    include_summary: bool,
    tool_name: String,
    tool_version: String,
}

impl OutputFormatter {
    /// Creates a new `OutputFormatter`.
    ///
    /// # Arguments
    ///
    /// * `format` - The `OutputFormat` to use.
    /// * `include_summary` - Whether to append a summary (only for the `Text`
    ///   format; the structured formats always carry their counts).
    pub fn new(format: OutputFormat, include_summary: bool) -> Self {
        Self {
            format,
            include_summary,
            tool_name: env!("CARGO_PKG_NAME").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Writes the formatted report to a given writer.
    pub fn write_output<W: Write>(&self, writer: &mut W, report: &Report<'_>) -> Result<()> {
        let output = match self.format {
            OutputFormat::Text => self.format_text(report),
            OutputFormat::Json => self.format_json(report)?,
            OutputFormat::Csv => self.format_csv(report)?,
            OutputFormat::Sarif => self.format_sarif(report)?,
        };

        writer.write_all(output.as_bytes())?;

        if self.include_summary && self.format == OutputFormat::Text {
            writer.write_all(self.format_summary(report).as_bytes())?;
        }

        Ok(())
    }

    fn format_text(&self, report: &Report<'_>) -> String {
        let mut output = String::new();

        for dep in report.dependencies {
            output.push_str(&format!(
                "{}\nDeclared in package.json ({}).\n\n",
                dep.rule.suggestion(),
                dep.source
            ));
        }

        for (result, rule, line, column, snippet) in report.occurrences() {
            output.push_str(&format!(
                "{}:{}:{}\n{}\n{}\n\n",
                result.path.display(),
                line + 1,
                column + 1,
                rule.suggestion(),
                snippet
            ));
        }

        for FileScanFailure { path, reason } in &report.outcome.failures {
            output.push_str(&format!("Could not scan {}: {}\n", path.display(), reason));
        }

        if report.outcome.cancelled {
            output.push_str(&format!(
                "Scan cancelled: {} file(s) were not scanned.\n",
                report.outcome.unscanned.len()
            ));
        }

        if report.dependencies.is_empty() && report.outcome.results.is_empty() {
            output.push_str("No replaceable modules found.\n");
        }

        output
    }

    fn format_json(&self, report: &Report<'_>) -> Result<String> {
        #[derive(Serialize)]
        struct JsonOutput<'a> {
            tool: ToolInfo<'a>,
            scan_time: DateTime<Utc>,
            files_scanned: usize,
            files_clean: usize,
            total_occurrences: usize,
            cancelled: bool,
            dependencies: &'a [DependencyFinding],
            results: &'a [FileScanResult],
            failures: &'a [FileScanFailure],
            unscanned: &'a [PathBuf],
        }

        #[derive(Serialize)]
        struct ToolInfo<'a> {
            name: &'a str,
            version: &'a str,
        }

        let outcome = report.outcome;
        let output = JsonOutput {
            tool: ToolInfo {
                name: &self.tool_name,
                version: &self.tool_version,
            },
            scan_time: Utc::now(),
            files_scanned: outcome.processed(),
            files_clean: outcome.clean,
            total_occurrences: outcome.occurrence_count(),
            cancelled: outcome.cancelled,
            dependencies: report.dependencies,
            results: &outcome.results,
            failures: &outcome.failures,
            unscanned: &outcome.unscanned,
        };

        Ok(serde_json::to_string_pretty(&output)?)
    }

    fn format_csv(&self, report: &Report<'_>) -> Result<String> {
        use csv::Writer;

        let mut wtr = Writer::from_writer(vec![]);
        wtr.write_record(["Module", "Kind", "Location", "Line", "Column", "Reference"])?;

        for dep in report.dependencies {
            wtr.write_record([
                dep.name.clone(),
                dep.rule.kind.label().to_string(),
                format!("package.json#{}", dep.source),
                String::new(),
                String::new(),
                dep.rule.reference_url().unwrap_or_default(),
            ])?;
        }

        for (result, rule, line, column, _) in report.occurrences() {
            wtr.write_record([
                rule.module_name.clone(),
                rule.kind.label().to_string(),
                result.path.display().to_string(),
                (line + 1).to_string(),
                (column + 1).to_string(),
                rule.reference_url().unwrap_or_default(),
            ])?;
        }

        let data = wtr.into_inner().map_err(|e| format!("CSV writer error: {}", e))?;
        Ok(String::from_utf8(data).unwrap_or_default())
    }

    fn format_sarif(&self, report: &Report<'_>) -> Result<String> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SarifOutput {
            #[serde(rename = "$schema")]
            schema: String,
            version: String,
            runs: Vec<Run>,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Run {
            tool: Tool,
            results: Vec<SarifResult>,
        }

        #[derive(Serialize)]
        struct Tool {
            driver: Driver,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Driver {
            name: String,
            version: String,
            rules: Vec<Rule>,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Rule {
            id: String,
            short_description: Text,
            #[serde(skip_serializing_if = "Option::is_none")]
            help_uri: Option<String>,
            default_configuration: Configuration,
        }

        #[derive(Serialize)]
        struct Text {
            text: String,
        }

        #[derive(Serialize)]
        struct Configuration {
            level: &'static str,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SarifResult {
            rule_id: String,
            level: &'static str,
            message: Text,
            locations: Vec<Location>,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Location {
            physical_location: PhysicalLocation,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct PhysicalLocation {
            artifact_location: ArtifactLocation,
            region: Region,
        }

        #[derive(Serialize)]
        struct ArtifactLocation {
            uri: String,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Region {
            start_line: usize,
            start_column: usize,
            snippet: Text,
        }

        let mut seen: BTreeMap<&str, &ReplacementRule> = BTreeMap::new();
        for (_, rule, ..) in report.occurrences() {
            seen.entry(rule.module_name.as_str()).or_insert(rule);
        }

        let rules: Vec<Rule> = seen
            .values()
            .map(|rule| Rule {
                id: rule.module_name.clone(),
                short_description: Text {
                    text: format!("Replaceable module: {} ({})", rule.module_name, rule.kind),
                },
                help_uri: rule.reference_url(),
                default_configuration: Configuration {
                    level: sarif_level(&rule.kind),
                },
            })
            .collect();

        let results: Vec<SarifResult> = report
            .occurrences()
            .map(|(result, rule, line, column, snippet)| SarifResult {
                rule_id: rule.module_name.clone(),
                level: sarif_level(&rule.kind),
                message: Text {
                    text: rule.suggestion(),
                },
                locations: vec![Location {
                    physical_location: PhysicalLocation {
                        artifact_location: ArtifactLocation {
                            uri: result.path.display().to_string(),
                        },
                        region: Region {
                            start_line: line + 1,
                            start_column: column + 1,
                            snippet: Text {
                                text: snippet.to_string(),
                            },
                        },
                    },
                }],
            })
            .collect();

        let output = SarifOutput {
            schema: "https://json.schemastore.org/sarif-2.1.0.json".to_string(),
            version: "2.1.0".to_string(),
            runs: vec![Run {
                tool: Tool {
                    driver: Driver {
                        name: self.tool_name.clone(),
                        version: self.tool_version.clone(),
                        rules,
                    },
                },
                results,
            }],
        };

        Ok(serde_json::to_string_pretty(&output)?)
    }

    /// Counts for the run plus the most frequently imported modules.
    fn format_summary(&self, report: &Report<'_>) -> String {
        let outcome = report.outcome;
        let mut module_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, rule, ..) in report.occurrences() {
            *module_counts.entry(rule.module_name.as_str()).or_insert(0) += 1;
        }

        let mut summary = String::new();
        summary.push_str(&format!("\n{} Summary {}\n", "=".repeat(20), "=".repeat(20)));
        summary.push_str(&format!("Files scanned: {}\n", outcome.processed()));
        summary.push_str(&format!("Files with matches: {}\n", outcome.results.len()));
        summary.push_str(&format!("Clean files: {}\n", outcome.clean));
        summary.push_str(&format!("Failed files: {}\n", outcome.failures.len()));
        if outcome.cancelled {
            summary.push_str(&format!("Unscanned files: {}\n", outcome.unscanned.len()));
        }
        summary.push_str(&format!("Total occurrences: {}\n", outcome.occurrence_count()));
        summary.push_str(&format!("Flagged dependencies: {}\n", report.dependencies.len()));

        if !module_counts.is_empty() {
            summary.push_str("\nTop modules:\n");
            let mut modules: Vec<_> = module_counts.into_iter().collect();
            modules.sort_by(|a, b| b.1.cmp(&a.1));
            for (module, count) in modules.iter().take(10) {
                summary.push_str(&format!("  {} - {} occurrences\n", module, count));
            }
        }

        summary
    }
}

/// Native and removable modules are actionable; documented ones need a decision.
fn sarif_level(kind: &ReplacementKind) -> &'static str {
    match kind {
        ReplacementKind::Documented { .. } => "note",
        _ => "warning",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DependencySource;
    use crate::outcome::{Occurrence, RuleMatch};

    fn rule(name: &str, kind: ReplacementKind) -> ReplacementRule {
        ReplacementRule {
            module_name: name.to_string(),
            kind,
            fix: vec![],
        }
    }

    fn create_test_outcome() -> ScanOutcome {
        let moment = rule("moment", ReplacementKind::Documented { doc_path: "moment".into() });
        let is_nan = rule("is-nan", ReplacementKind::Native { mdn_path: "Global_Objects/Number/isNaN".into() });
        ScanOutcome {
            results: vec![FileScanResult {
                path: PathBuf::from("src/app.ts"),
                matches: vec![
                    RuleMatch {
                        rule: moment,
                        occurrences: vec![Occurrence {
                            line: 0,
                            column: 0,
                            snippet: "1 | import moment from 'moment';".into(),
                        }],
                    },
                    RuleMatch {
                        rule: is_nan,
                        occurrences: vec![Occurrence {
                            line: 3,
                            column: 12,
                            snippet: "4 | const nan = require('is-nan');".into(),
                        }],
                    },
                ],
                contents: None,
            }],
            failures: vec![FileScanFailure {
                path: PathBuf::from("src/broken.ts"),
                reason: "permission denied".into(),
            }],
            clean: 7,
            unscanned: vec![],
            cancelled: false,
        }
    }

    fn create_test_dependencies() -> Vec<DependencyFinding> {
        vec![DependencyFinding {
            name: "chalk".into(),
            source: DependencySource::DevDependencies,
            rule: rule("chalk", ReplacementKind::Documented { doc_path: "chalk".into() }),
        }]
    }

    fn render(format: OutputFormat, summary: bool) -> String {
        let outcome = create_test_outcome();
        let dependencies = create_test_dependencies();
        let mut out = Vec::new();
        OutputFormatter::new(format, summary)
            .write_output(
                &mut out,
                &Report {
                    dependencies: &dependencies,
                    outcome: &outcome,
                },
            )
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_text_format() {
        let output = render(OutputFormat::Text, true);

        assert!(output.contains("src/app.ts:1:1"));
        assert!(output.contains("src/app.ts:4:13"));
        assert!(output.contains("Global_Objects/Number/isNaN"));
        assert!(output.contains("Declared in package.json (devDependencies)"));
        assert!(output.contains("Could not scan src/broken.ts: permission denied"));
        assert!(output.contains("Files scanned: 9"));
        assert!(output.contains("Clean files: 7"));
    }

    #[test]
    fn test_text_format_without_findings() {
        let outcome = ScanOutcome {
            clean: 3,
            ..Default::default()
        };
        let mut out = Vec::new();
        OutputFormatter::new(OutputFormat::Text, false)
            .write_output(
                &mut out,
                &Report {
                    dependencies: &[],
                    outcome: &outcome,
                },
            )
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No replaceable modules found.\n");
    }

    #[test]
    fn test_json_format() {
        let output = render(OutputFormat::Json, false);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(parsed["total_occurrences"], 2);
        assert_eq!(parsed["files_clean"], 7);
        assert_eq!(parsed["results"][0]["matches"][0]["rule"]["module_name"], "moment");
        assert_eq!(parsed["results"][0]["matches"][0]["rule"]["kind"], "documented");
        assert_eq!(parsed["dependencies"][0]["source"], "devDependencies");
        assert_eq!(parsed["failures"][0]["reason"], "permission denied");
        assert!(parsed["results"][0].get("contents").is_none());
    }

    #[test]
    fn test_csv_format() {
        let output = render(OutputFormat::Csv, false);

        let mut rdr = csv::Reader::from_reader(output.as_bytes());
        let headers = rdr.headers().unwrap();
        assert_eq!(headers.get(0), Some("Module"));

        let records: Vec<_> = rdr
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get(2), Some("package.json#devDependencies"));
        assert_eq!(records[2].get(3), Some("4"));
    }

    #[test]
    fn test_sarif_format() {
        let output = render(OutputFormat::Sarif, false);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(parsed["version"], "2.1.0");
        let results = parsed["runs"][0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["level"], "note");
        assert_eq!(results[1]["level"], "warning");
        assert_eq!(results[1]["locations"][0]["physicalLocation"]["region"]["startLine"], 4);
        assert_eq!(parsed["runs"][0]["tool"]["driver"]["rules"].as_array().unwrap().len(), 2);
    }
}
