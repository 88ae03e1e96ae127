//! Locating the component to mount in generated source.
//!
//! Generated code rarely follows one convention, so the root component is
//! found by a list of independent strategies evaluated in a fixed order:
//!
//! 1. [`DeclaredComponents`] - uppercase `function Name` / `const Name =`
//!    declarations that end up as callable globals
//! 2. [`ExportDefault`] - `export default Name`
//! 3. [`ExportNamed`] - `export const Name`
//!
//! Each strategy is a pure function of the source text. The combined result
//! is a [`MountPlan`]; the preview document tries its candidates in order and
//! only then falls back to scanning `window` at runtime.

use crate::error::PreviewError;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Message used when nothing in the source can be mounted.
pub const NO_COMPONENT_MESSAGE: &str = "Could not find a React component to render. \
Define a component with an uppercase name (for example `function App() { ... }`) \
or export it with `export default App`.";

/// How the preview document evaluates the source.
///
/// Source that still contains `export` statements must run as a module, and
/// top-level declarations in a module never become globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    Script,
    Module,
}

impl ScopeMode {
    pub fn detect(source: &str) -> Self {
        static EXPORT: OnceLock<Regex> = OnceLock::new();
        let re = EXPORT.get_or_init(|| Regex::new(r"(?m)(?:^|;)[ \t]*export\s").unwrap());
        if re.is_match(source) {
            ScopeMode::Module
        } else {
            ScopeMode::Script
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    DeclaredGlobal,
    ExportDefault,
    ExportNamed,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::DeclaredGlobal => "declared-global",
            StrategyKind::ExportDefault => "export-default",
            StrategyKind::ExportNamed => "export-named",
        }
    }
}

/// A name to try, and the strategy that proposed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountCandidate {
    pub name: String,
    pub strategy: StrategyKind,
}

pub trait MountStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Candidate names in the order they should be tried.
    fn candidates(&self, source: &str, mode: ScopeMode) -> Vec<String>;
}

/// Uppercase `function Name` and `const Name =` declarations.
///
/// Only script-mode declarations become globals. Later declarations are
/// tried first: generated files define helpers before the root component.
pub struct DeclaredComponents;

impl MountStrategy for DeclaredComponents {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DeclaredGlobal
    }

    fn candidates(&self, source: &str, mode: ScopeMode) -> Vec<String> {
        if mode == ScopeMode::Module {
            return Vec::new();
        }

        static DECLARATION: OnceLock<Regex> = OnceLock::new();
        let re = DECLARATION.get_or_init(|| {
            Regex::new(concat!(
                r"\b(?:function\s+([A-Z][A-Za-z0-9_$]*)",
                r"|const\s+([A-Z][A-Za-z0-9_$]*)\s*=)",
            ))
            .unwrap()
        });

        let mut names: Vec<String> = re
            .captures_iter(source)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        names.reverse();
        dedup(names)
    }
}

/// `export default Name`, including `export default function Name`.
pub struct ExportDefault;

impl MountStrategy for ExportDefault {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExportDefault
    }

    fn candidates(&self, source: &str, _mode: ScopeMode) -> Vec<String> {
        static EXPORT_DEFAULT: OnceLock<Regex> = OnceLock::new();
        let re = EXPORT_DEFAULT.get_or_init(|| {
            Regex::new(concat!(
                r"\bexport\s+default\s+",
                r"(?:(?:async\s+)?function\s*\*?\s*|class\s+)?",
                r"([A-Za-z_$][A-Za-z0-9_$]*)",
            ))
            .unwrap()
        });

        re.captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|name| !is_reserved(name))
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    }
}

/// `export const Name`, plus `export function Name` / `export class Name`.
pub struct ExportNamed;

impl MountStrategy for ExportNamed {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExportNamed
    }

    fn candidates(&self, source: &str, _mode: ScopeMode) -> Vec<String> {
        static EXPORT_NAMED: OnceLock<Regex> = OnceLock::new();
        let re = EXPORT_NAMED.get_or_init(|| {
            Regex::new(r"\bexport\s+(?:const|let|var|function|class)\s+([A-Z][A-Za-z0-9_$]*)")
                .unwrap()
        });

        dedup(
            re.captures_iter(source)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .collect(),
        )
    }
}

/// The strategies in priority order.
pub fn default_strategies() -> Vec<Box<dyn MountStrategy>> {
    vec![
        Box::new(DeclaredComponents),
        Box::new(ExportDefault),
        Box::new(ExportNamed),
    ]
}

/// Ordered, de-duplicated mount candidates for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPlan {
    pub mode: ScopeMode,
    pub candidates: Vec<MountCandidate>,
}

impl MountPlan {
    pub fn resolve(source: &str) -> Self {
        Self::resolve_with(source, &default_strategies())
    }

    pub fn resolve_with(source: &str, strategies: &[Box<dyn MountStrategy>]) -> Self {
        let mode = ScopeMode::detect(source);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for strategy in strategies {
            for name in strategy.candidates(source, mode) {
                if seen.insert(name.clone()) {
                    candidates.push(MountCandidate {
                        name,
                        strategy: strategy.kind(),
                    });
                }
            }
        }

        Self { mode, candidates }
    }

    /// The candidate the document will try first.
    pub fn selected(&self) -> Option<&MountCandidate> {
        self.candidates.first()
    }

    /// Fails with a mount error when no strategy found anything.
    ///
    /// The document still falls back to a runtime scan of `window`, so this
    /// is a warning for callers rather than a guarantee of failure.
    pub fn require_component(&self) -> Result<&MountCandidate, PreviewError> {
        self.selected()
            .ok_or_else(|| PreviewError::MountFailure(NO_COMPONENT_MESSAGE.to_string()))
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names.into_iter().filter(|n| seen.insert(n.clone())).collect()
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "function" | "class" | "async" | "new" | "null" | "true" | "false" | "this" | "await"
    )
}
