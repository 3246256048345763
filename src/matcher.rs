use crate::errors::Result;
use crate::outcome::Occurrence;
use crate::rules::ReplacementRule;
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;

/// Decides where a source file imports a given module.
///
/// Implementations must be shareable across scan workers. Returned
/// occurrences are in document order (line, then column).
pub trait ImportMatcher: Send + Sync {
    /// Finds every import/require site of `module_name` in `source`.
    fn find_imports(&self, source: &str, module_name: &str) -> Result<Vec<Occurrence>>;
}

/// Regex-based matcher for ECMAScript and CommonJS module syntax.
///
/// Recognises, for an exact module specifier:
/// `import x from 'm'`, `import { a } from "m"`, `import * as x from 'm'`,
/// `import type { T } from 'm'`, `import 'm'`, `export { a } from 'm'`,
/// `require('m')` and `import('m')`.
///
/// Sites that start inside a comment or a string literal are skipped. Regex
/// literals and JSX text are not recognised, so a stray quote in either can
/// hide the rest of that line.
pub struct EsImportMatcher {
    compiled: HashMap<String, Regex>,
}

impl Default for EsImportMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EsImportMatcher {
    /// Creates a matcher that compiles patterns on demand.
    pub fn new() -> Self {
        Self {
            compiled: HashMap::new(),
        }
    }

    /// Creates a matcher with the patterns for `rules` compiled up front.
    pub fn for_rules(rules: &[ReplacementRule]) -> Result<Self> {
        let mut compiled = HashMap::with_capacity(rules.len());
        for rule in rules {
            if !compiled.contains_key(&rule.module_name) {
                compiled.insert(rule.module_name.clone(), import_regex(&rule.module_name)?);
            }
        }
        Ok(Self { compiled })
    }
}

impl ImportMatcher for EsImportMatcher {
    fn find_imports(&self, source: &str, module_name: &str) -> Result<Vec<Occurrence>> {
        // Cheap reject before touching the regex engine.
        if !source.contains(module_name) {
            return Ok(Vec::new());
        }

        let on_demand;
        let regex = match self.compiled.get(module_name) {
            Some(regex) => regex,
            None => {
                on_demand = import_regex(module_name)?;
                &on_demand
            }
        };

        let lines: Vec<&str> = source.split('\n').collect();
        let line_starts = line_starts(source);
        let skipped = non_code_spans(source);
        let mut occurrences = Vec::new();

        for m in regex.find_iter(source) {
            if in_spans(&skipped, m.start()) {
                continue;
            }
            let line = line_starts.partition_point(|&start| start <= m.start()) - 1;
            let column = source[line_starts[line]..m.start()].chars().count();
            occurrences.push(Occurrence {
                line,
                column,
                snippet: snippet(&lines, line),
            });
        }

        Ok(occurrences)
    }
}

/// Builds the import/require pattern for one module specifier.
fn import_regex(module_name: &str) -> Result<Regex> {
    let quoted = format!(r#"['"]{}['"]"#, regex::escape(module_name));
    let clause = r"[\w*{}\s,$]+?";
    let pattern = format!(
        r"\bimport\s+(?:{clause}\s+from\s+)?{quoted}|\bexport\s+{clause}\s+from\s+{quoted}|\brequire\s*\(\s*{quoted}\s*\)|\bimport\s*\(\s*{quoted}\s*\)"
    );
    Ok(Regex::new(&pattern)?)
}

/// Byte offsets at which each line of `source` starts.
fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Byte ranges covered by comments and string literals, in order.
///
/// Quotes and slashes are ASCII, so walking bytes never splits a UTF-8
/// sequence that matters. Single and double quoted strings end at a newline.
fn non_code_spans(source: &str) -> Vec<Range<usize>> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = source[i..].find('\n').map_or(bytes.len(), |p| i + p);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = source[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    } else if bytes[i] == b'\n' && quote != b'`' {
                        break;
                    }
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
            }
            _ => {
                i += 1;
                continue;
            }
        }
        spans.push(start..i);
    }

    spans
}

fn in_spans(spans: &[Range<usize>], pos: usize) -> bool {
    let idx = spans.partition_point(|span| span.end <= pos);
    spans.get(idx).is_some_and(|span| span.start <= pos)
}

/// Renders the matched line with its non-empty neighbours.
fn snippet(lines: &[&str], line: usize) -> String {
    let text = |i: usize| lines[i].trim_end_matches('\r');
    let mut out = String::new();
    if line > 0 && !text(line - 1).is_empty() {
        out.push_str(&format!("{} | {}\n", line, text(line - 1)));
    }
    out.push_str(&format!("{} | {}\n", line + 1, text(line)));
    if line + 1 < lines.len() && !text(line + 1).is_empty() {
        out.push_str(&format!("{} | {}\n", line + 2, text(line + 1)));
    }
    out
}
