use crate::config::ConfigLoader;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// The catalog shipped with the binary.
const BUILTIN_CATALOG: &str = include_str!("../data/catalog.yaml");

/// The manifests selected when the user does not name any.
pub const DEFAULT_MANIFESTS: [&str; 3] = ["native", "micro-utilities", "preferred"];

/// Declares that a module is replaceable and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRule {
    /// The exact module specifier, as it appears in `import`/`require`.
    pub module_name: String,
    #[serde(flatten)]
    pub kind: ReplacementKind,
    /// Optional ordered rewrites for the fix stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fix: Vec<FixStep>,
}

/// What the module should be replaced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReplacementKind {
    /// An alternative is described in the module-replacements documentation.
    Documented { doc_path: String },
    /// The platform provides the functionality natively.
    Native { mdn_path: String },
    /// No replacement is needed; the module can usually be removed.
    None,
    /// A short inline replacement.
    Simple { replacement: String },
}

impl ReplacementKind {
    /// The lowercase tag used in catalogs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            ReplacementKind::Documented { .. } => "documented",
            ReplacementKind::Native { .. } => "native",
            ReplacementKind::None => "none",
            ReplacementKind::Simple { .. } => "simple",
        }
    }
}

impl fmt::Display for ReplacementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single regex rewrite applied to a file's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixStep {
    pub pattern: String,
    pub replacement: String,
}

impl ReplacementRule {
    /// Human readable guidance for this rule, without any location information.
    pub fn suggestion(&self) -> String {
        match &self.kind {
            ReplacementKind::Documented { doc_path } => format!(
                "Module {} could be replaced with a more performant alternative.\n\
                 You can find an alternative in the following documentation:\n{}",
                self.module_name,
                docs_url(doc_path)
            ),
            ReplacementKind::Native { mdn_path } => format!(
                "Module {} could be replaced with the following native functionality:\n{}",
                self.module_name,
                mdn_url(mdn_path)
            ),
            ReplacementKind::None => format!(
                "Module {} could be removed or replaced with a more performant alternative.",
                self.module_name
            ),
            ReplacementKind::Simple { replacement } => format!(
                "Module {} could be replaced with inline/native equivalent logic.\n{}",
                self.module_name, replacement
            ),
        }
    }

    /// The reference URL for this rule, if its kind carries one.
    pub fn reference_url(&self) -> Option<String> {
        match &self.kind {
            ReplacementKind::Documented { doc_path } => Some(docs_url(doc_path)),
            ReplacementKind::Native { mdn_path } => Some(mdn_url(mdn_path)),
            _ => None,
        }
    }
}

/// URL of the module-replacements documentation page for `name`.
pub fn docs_url(name: &str) -> String {
    format!("https://github.com/es-tooling/module-replacements/blob/main/docs/modules/{name}.md")
}

/// URL of the MDN JavaScript reference page at `path`.
pub fn mdn_url(path: &str) -> String {
    format!("https://developer.mozilla.org/en-US/docs/Web/JavaScript/Reference/{path}")
}

/// Named lists of replacement rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleCatalog {
    pub manifests: BTreeMap<String, Vec<ReplacementRule>>,
}

impl RuleCatalog {
    /// The catalog embedded in the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Parses a catalog from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Names of the manifests in this catalog.
    pub fn manifest_names(&self) -> impl Iterator<Item = &str> {
        self.manifests.keys().map(String::as_str)
    }

    /// Flattens the named manifests, in the order given, into a shared rule set.
    ///
    /// A module listed by several selected manifests is kept once, from the
    /// first manifest that names it. Unknown manifest names are an error.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Arc<[ReplacementRule]>> {
        let mut rules: Vec<ReplacementRule> = Vec::new();
        for name in names {
            let name = name.as_ref();
            let manifest = self.manifests.get(name).ok_or_else(|| {
                format!(
                    "Unknown manifest '{}'. Available: {}",
                    name,
                    self.manifest_names().collect::<Vec<_>>().join(", ")
                )
            })?;
            for rule in manifest {
                if !rules.iter().any(|r| r.module_name == rule.module_name) {
                    rules.push(rule.clone());
                }
            }
        }
        Ok(rules.into())
    }
}

/// The main entry point for the `rules` command.
pub fn run_rules(manifests: Vec<String>, catalog: Option<PathBuf>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let catalog = ConfigLoader::resolve_catalog(catalog.as_deref(), &cwd)?;
    let rules = catalog.select(&manifests)?;
    print!("{}", format_rule_list(&rules, &manifests));
    Ok(())
}

/// One line per rule, then a count of rules and the manifests they came from.
fn format_rule_list(rules: &[ReplacementRule], manifests: &[String]) -> String {
    let mut output = String::new();
    for rule in rules {
        let detail = match &rule.kind {
            ReplacementKind::Simple { replacement } => replacement.clone(),
            _ => rule.reference_url().unwrap_or_default(),
        };
        let fixable = if rule.fix.is_empty() { "" } else { " (fixable)" };
        output.push_str(&format!(
            "{:<28} {:<11}{} {}\n",
            rule.module_name,
            rule.kind.label(),
            fixable,
            detail
        ));
    }
    output.push_str(&format!("\n{} rule(s) from: {}\n", rules.len(), manifests.join(", ")));
    output
}
