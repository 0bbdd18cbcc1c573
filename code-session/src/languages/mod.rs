//! Language build plans
//!
//! Every supported language identifier maps to exactly one [`BuildPlan`]: the
//! name of the source file, an optional compile command and the run command.
//! Plans are plain data so new languages can be added from a TOML file
//! without touching the session flow.

mod builtin;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tracing::debug;
use which::which;

use crate::{error::Error, types::LanguageStatus, Result};

/// Placeholder expanded to the workspace root directory
pub const WORKSPACE_PLACEHOLDER: &str = "{workspace}";
/// Placeholder expanded to the full path of the source file
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// A program plus argument template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Expands placeholders against a concrete workspace.
    pub fn render(&self, root: &Path, source: &Path) -> (String, Vec<String>) {
        let root = root.to_string_lossy();
        let source = source.to_string_lossy();
        let expand = |s: &str| {
            s.replace(WORKSPACE_PLACEHOLDER, &root)
                .replace(SOURCE_PLACEHOLDER, &source)
        };
        (
            expand(&self.program),
            self.args.iter().map(|arg| expand(arg)).collect(),
        )
    }

    /// Host program this command needs, if it lives outside the workspace.
    fn host_tool(&self) -> Option<&str> {
        if self.program.contains(WORKSPACE_PLACEHOLDER) || self.program.contains(SOURCE_PLACEHOLDER)
        {
            None
        } else {
            Some(self.program.as_str())
        }
    }
}

/// How to compile (optionally) and run one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub language: String,
    /// File name of the submitted source inside the workspace
    pub source_file: String,
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
}

impl BuildPlan {
    pub fn interpreted(language: &str, source_file: &str, run: CommandTemplate) -> Self {
        Self {
            language: language.to_string(),
            source_file: source_file.to_string(),
            compile: None,
            run,
        }
    }

    pub fn compiled(
        language: &str,
        source_file: &str,
        compile: CommandTemplate,
        run: CommandTemplate,
    ) -> Self {
        Self {
            language: language.to_string(),
            source_file: source_file.to_string(),
            compile: Some(compile),
            run,
        }
    }

    pub fn requires_compile(&self) -> bool {
        self.compile.is_some()
    }

    /// Host programs this plan invokes
    pub fn required_tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self
            .compile
            .iter()
            .chain(std::iter::once(&self.run))
            .filter_map(CommandTemplate::host_tool)
            .collect();
        tools.dedup();
        tools
    }

    fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.source_file).components();
        let bare_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !bare_name {
            return Err(Error::Configuration(format!(
                "{}: source_file must be a bare file name, got {:?}",
                self.language, self.source_file
            )));
        }

        for command in self.compile.iter().chain(std::iter::once(&self.run)) {
            if command.program.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "{}: command program must not be empty",
                    self.language
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PlanSpec {
    source_file: String,
    #[serde(default)]
    compile: Option<CommandTemplate>,
    run: CommandTemplate,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    languages: BTreeMap<String, PlanSpec>,
}

/// Lookup table from language identifier to build plan
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    plans: BTreeMap<String, BuildPlan>,
}

impl LanguageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The languages served out of the box.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for plan in builtin::plans() {
            table.insert(plan);
        }
        table
    }

    /// Parses a `[languages.<id>]` TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(source)
            .map_err(|e| Error::Configuration(format!("Invalid language table: {}", e)))?;

        let mut table = Self::new();
        for (language, spec) in file.languages {
            let plan = BuildPlan {
                language,
                source_file: spec.source_file,
                compile: spec.compile,
                run: spec.run,
            };
            plan.validate()?;
            table.insert(plan);
        }
        Ok(table)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!(
                "Failed to read language table {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&source)
    }

    /// Adds or replaces one plan, returning the one it replaced.
    pub fn insert(&mut self, plan: BuildPlan) -> Option<BuildPlan> {
        self.plans.insert(plan.language.clone(), plan)
    }

    /// Overlays `other` onto this table; plans in `other` win.
    pub fn merge(mut self, other: LanguageTable) -> Self {
        for (language, plan) in other.plans {
            debug!("Overriding build plan for {}", language);
            self.plans.insert(language, plan);
        }
        self
    }

    pub fn resolve(&self, language: &str) -> Result<&BuildPlan> {
        self.plans
            .get(language)
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Reports whether each language's tools are installed on this host.
    pub fn availability(&self) -> Vec<LanguageStatus> {
        self.plans.values().map(status_of).collect()
    }

    pub fn status(&self, language: &str) -> Result<LanguageStatus> {
        self.resolve(language).map(status_of)
    }
}

fn status_of(plan: &BuildPlan) -> LanguageStatus {
    LanguageStatus {
        language: plan.language.clone(),
        compiled: plan.requires_compile(),
        available: plan.required_tools().iter().all(|tool| check_command(tool)),
    }
}

pub(crate) fn check_command(cmd: &str) -> bool {
    which(cmd).is_ok()
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
