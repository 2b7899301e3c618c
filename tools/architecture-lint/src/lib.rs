//! Repo-local architectural lint for the skeleton's layer boundaries.
//!
//! The service is split into `domain` (contracts, ports and use-cases),
//! `inbound` (ingress adapters) and `outbound` (capability drivers). Only
//! `bootstrap` and the CLI see every layer. Each layer has a [`Rule`]
//! naming the sibling layers and external crates it must not reference.
//!
//! Test modules (`tests.rs` files and `#[cfg(test)]` items) may wire
//! in-memory drivers across layers and are skipped.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use syn::visit::Visit;

/// Name the service crate is imported under from integration code.
const CRATE_NAME: &str = "skeleton";

/// Boundary rule for one top-level module under `backend/src`.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Directory name of the layer.
    pub layer: &'static str,
    /// Sibling layers the layer must not reference.
    pub modules: &'static [&'static str],
    /// External crates the layer must not reference.
    pub crates: &'static [&'static str],
}

/// Boundaries enforced by [`lint_backend_sources`].
pub const RULES: &[Rule] = &[
    Rule {
        layer: "domain",
        modules: &["inbound", "outbound", "bootstrap", "cli"],
        crates: &[
            "actix_web",
            "argon2",
            "bb8_redis",
            "cap_std",
            "jsonwebtoken",
            "notify",
            "reqwest",
            "ring",
            "sqlx",
        ],
    },
    Rule {
        layer: "inbound",
        modules: &["outbound", "bootstrap", "cli"],
        crates: &[
            "argon2",
            "bb8_redis",
            "cap_std",
            "jsonwebtoken",
            "reqwest",
            "ring",
            "sqlx",
        ],
    },
    Rule {
        layer: "outbound",
        modules: &["inbound", "bootstrap", "cli"],
        crates: &["actix_web"],
    },
];

/// A single boundary violation discovered by the linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File path relative to `backend/src`.
    pub file: PathBuf,
    /// Human-readable description of the violated rule.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file.display(), self.message)
    }
}

/// Failure modes returned by the architecture lint.
#[derive(Debug)]
pub enum ArchitectureLintError {
    /// Filesystem traversal or reading failed.
    Io(io::Error),
    /// A source could not be parsed or placed in a layer.
    Parse {
        /// Offending file, relative to `backend/src`.
        file: PathBuf,
        /// Parser or layer inference message.
        message: String,
    },
    /// One or more boundary violations were found.
    Violations(Vec<Violation>),
}

impl fmt::Display for ArchitectureLintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read sources: {err}"),
            Self::Parse { file, message } => {
                write!(f, "cannot lint {}: {message}", file.display())
            }
            Self::Violations(violations) => {
                writeln!(f, "{} layer boundary violation(s):", violations.len())?;
                for violation in violations {
                    writeln!(f, "- {violation}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ArchitectureLintError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse { .. } | Self::Violations(_) => None,
        }
    }
}

impl From<io::Error> for ArchitectureLintError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A Rust source file to be linted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintSource {
    /// Path relative to `backend/src`.
    pub file: PathBuf,
    /// Full source text.
    pub contents: String,
}

/// Lint the layered modules of the service crate on disk.
///
/// `backend_dir` is the directory holding the crate's `Cargo.toml`.
///
/// # Errors
/// [`ArchitectureLintError::Violations`] listing every crossing, or an
/// I/O or parse failure.
pub fn lint_backend_sources(backend_dir: &Path) -> Result<(), ArchitectureLintError> {
    let src_dir = backend_dir.join("src");
    let mut sources = Vec::new();
    for rule in RULES {
        let dir = src_dir.join(rule.layer);
        if dir.is_dir() {
            collect_sources(&src_dir, &dir, &mut sources)?;
        }
    }
    lint_sources(&sources)
}

/// Lint in-memory sources whose paths are relative to `backend/src`.
///
/// # Errors
/// As [`lint_backend_sources`]; a file outside every layer is a
/// [`ArchitectureLintError::Parse`] error.
pub fn lint_sources(sources: &[LintSource]) -> Result<(), ArchitectureLintError> {
    let mut violations = Vec::new();
    for source in sources.iter().filter(|source| !is_test_file(&source.file)) {
        let rule = rule_for(&source.file).ok_or_else(|| ArchitectureLintError::Parse {
            file: source.file.clone(),
            message: "file is not under a linted layer".to_owned(),
        })?;
        let parsed =
            syn::parse_file(&source.contents).map_err(|err| ArchitectureLintError::Parse {
                file: source.file.clone(),
                message: err.to_string(),
            })?;
        violations.extend(check(&source.file, rule, &parsed));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArchitectureLintError::Violations(violations))
    }
}

fn is_test_file(file: &Path) -> bool {
    file.file_name().is_some_and(|name| name == "tests.rs")
}

fn rule_for(file: &Path) -> Option<&'static Rule> {
    let first = file.components().next()?.as_os_str().to_str()?;
    RULES.iter().find(|rule| rule.layer == first)
}

fn check(file: &Path, rule: &Rule, parsed: &syn::File) -> Vec<Violation> {
    let mut collector = PathCollector::default();
    collector.visit_file(parsed);

    let mut messages = BTreeSet::new();
    for segments in &collector.paths {
        if let Some(module) = internal_root(segments).filter(|root| rule.modules.contains(root)) {
            messages.insert(format!(
                "{} module must not depend on crate::{module}",
                rule.layer
            ));
        }
        if let Some(krate) = external_root(segments).filter(|root| rule.crates.contains(root)) {
            messages.insert(format!(
                "{} module must not depend on external crate `{krate}`",
                rule.layer
            ));
        }
    }
    messages
        .into_iter()
        .map(|message| Violation {
            file: file.to_path_buf(),
            message,
        })
        .collect()
}

fn is_relative(segment: &str) -> bool {
    matches!(segment, "crate" | "self" | "super")
}

/// First module named by a crate-internal path, if the path is internal.
fn internal_root(segments: &[String]) -> Option<&str> {
    let first = segments.first()?.as_str();
    if RULES.iter().any(|rule| rule.layer == first) {
        return Some(first);
    }
    let index = if is_relative(first) {
        segments.iter().position(|segment| !is_relative(segment))?
    } else if first == CRATE_NAME {
        1
    } else {
        return None;
    };
    segments.get(index).map(String::as_str)
}

fn external_root(segments: &[String]) -> Option<&str> {
    let root = segments.first()?.as_str();
    (!is_relative(root) && root != CRATE_NAME).then_some(root)
}

#[derive(Default)]
struct PathCollector {
    paths: BTreeSet<Vec<String>>,
}

impl PathCollector {
    fn record_use_tree(&mut self, tree: &syn::UseTree, mut prefix: Vec<String>) {
        match tree {
            syn::UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                self.record_use_tree(&path.tree, prefix);
            }
            syn::UseTree::Name(name) => {
                prefix.push(name.ident.to_string());
                self.paths.insert(prefix);
            }
            syn::UseTree::Rename(rename) => {
                prefix.push(rename.ident.to_string());
                self.paths.insert(prefix);
            }
            syn::UseTree::Glob(_) => {
                prefix.push("*".to_owned());
                self.paths.insert(prefix);
            }
            syn::UseTree::Group(group) => {
                for item in &group.items {
                    self.record_use_tree(item, prefix.clone());
                }
            }
        }
    }
}

impl<'ast> Visit<'ast> for PathCollector {
    fn visit_path(&mut self, node: &'ast syn::Path) {
        let segments: Vec<String> = node
            .segments
            .iter()
            .map(|segment| segment.ident.to_string())
            .collect();
        if !segments.is_empty() {
            self.paths.insert(segments);
        }
        syn::visit::visit_path(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        self.record_use_tree(&node.tree, Vec::new());
    }

    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        if !node.attrs.iter().any(is_cfg_test) {
            syn::visit::visit_item_mod(self, node);
        }
    }
}

fn is_cfg_test(attr: &syn::Attribute) -> bool {
    attr.path().is_ident("cfg")
        && attr
            .parse_args::<syn::Ident>()
            .is_ok_and(|ident| ident == "test")
}

fn collect_sources(
    src_root: &Path,
    current: &Path,
    sources: &mut Vec<LintSource>,
) -> Result<(), ArchitectureLintError> {
    for entry in fs::read_dir(current)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sources(src_root, &path, sources)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            let file = path
                .strip_prefix(src_root)
                .map_err(|err| ArchitectureLintError::Parse {
                    file: path.clone(),
                    message: err.to_string(),
                })?
                .to_path_buf();
            let contents = fs::read_to_string(&path)?;
            sources.push(LintSource { file, contents });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
