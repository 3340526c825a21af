//! Migration hooks: optional callbacks around table and field operations.
//!
//! A hook is addressed by a typed [`HookKey`] (phase, operation, table, optional field). Providers
//! answer `None` when they define nothing for a key, which is never an error.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPhase {
    Before,
    After,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Before => write!(f, "before"),
            HookPhase::After => write!(f, "after"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookOperation {
    AddTable,
    RemoveTable,
    RenameTable,
    AddField,
    AlterField,
    RemoveField,
    RenameField,
}

impl fmt::Display for HookOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookOperation::AddTable => "AddTable",
            HookOperation::RemoveTable => "RemoveTable",
            HookOperation::RenameTable => "RenameTable",
            HookOperation::AddField => "AddField",
            HookOperation::AlterField => "AlterField",
            HookOperation::RemoveField => "RemoveField",
            HookOperation::RenameField => "RenameField",
        };
        write!(f, "{}", name)
    }
}

/// Renames are keyed by the new name of the table or field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookKey {
    pub phase: HookPhase,
    pub operation: HookOperation,
    pub table: String,
    pub field: Option<String>,
}

impl HookKey {
    pub fn table(phase: HookPhase, operation: HookOperation, table: &str) -> Self {
        Self {
            phase,
            operation,
            table: table.to_string(),
            field: None,
        }
    }

    pub fn field(phase: HookPhase, operation: HookOperation, table: &str, field: &str) -> Self {
        Self {
            phase,
            operation,
            table: table.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// The same key in the other phase.
    pub fn with_phase(&self, phase: HookPhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

/// Conventional name, e.g. `beforeAddField__users__email`.
impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}__{}", self.phase, self.operation, self.table)?;
        if let Some(field) = &self.field {
            write!(f, "__{}", field)?;
        }
        Ok(())
    }
}

#[allow(async_fn_in_trait)]
pub trait HookProvider {
    /// Run the hook for `key`. `Ok(None)` means no hook is defined; `Ok(Some(false))` and `Err`
    /// are both failures.
    async fn invoke(&mut self, key: &HookKey) -> Result<Option<bool>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl HookProvider for NoHooks {
    async fn invoke(&mut self, _key: &HookKey) -> Result<Option<bool>> {
        Ok(None)
    }
}

type HookFn = Box<dyn FnMut(&HookKey) -> bool>;

/// Hooks registered in code.
#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<HookKey, HookFn>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: HookKey, hook: impl FnMut(&HookKey) -> bool + 'static) {
        self.hooks.insert(key, Box::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl HookProvider for HookRegistry {
    async fn invoke(&mut self, key: &HookKey) -> Result<Option<bool>> {
        Ok(self.hooks.get_mut(key).map(|hook| hook(key)))
    }
}

/// Executables in a directory, named by the conventional hook name. Script extensions such as
/// `.sh` or `.py` are ignored, so `beforeRemoveTable__users.sh` serves `beforeRemoveTable__users`.
///
/// Each script runs with `PGSHIFT_HOOK`, `PGSHIFT_TABLE` and (for field hooks) `PGSHIFT_FIELD`
/// set. Exit status 0 is success.
#[derive(Debug, Default)]
pub struct ScriptHooks {
    scripts: BTreeMap<String, PathBuf>,
    env: Vec<(String, String)>,
}

impl ScriptHooks {
    /// Discover hook scripts in `dir`. A missing directory yields no hooks.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut scripts = BTreeMap::new();

        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Hooks directory not found, no hooks loaded");
            return Ok(Self::default());
        }

        let pattern = dir.join("*").to_string_lossy().to_string();
        for entry in glob::glob(&pattern).context("Invalid hooks directory pattern")? {
            let path = entry.context("Failed to read hooks directory entry")?;
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_name().and_then(|s| s.to_str()).map(hook_name) else {
                continue;
            };
            if !stem.starts_with("before") && !stem.starts_with("after") {
                continue;
            }
            if let Some(previous) = scripts.insert(stem.to_string(), path.clone()) {
                warn!(
                    hook = stem,
                    ignored = %previous.display(),
                    "Several scripts serve the same hook, using the last one"
                );
            }
        }

        info!(count = scripts.len(), dir = %dir.display(), "Discovered hook scripts");
        Ok(Self {
            scripts,
            env: Vec::new(),
        })
    }

    /// Extra environment passed to every script, e.g. the database URL.
    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.push((name.to_string(), value.to_string()));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }
}

/// Extensions dropped from script file names. Anything else after a dot is part of a table or
/// field name.
const SCRIPT_EXTENSIONS: &[&str] = &[
    "sh", "bash", "zsh", "py", "pl", "rb", "php", "js", "exe", "bat", "cmd", "ps1",
];

fn hook_name(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((name, extension)) if SCRIPT_EXTENSIONS.contains(&extension) => name,
        _ => file_name,
    }
}

impl HookProvider for ScriptHooks {
    async fn invoke(&mut self, key: &HookKey) -> Result<Option<bool>> {
        let name = key.to_string();
        let Some(path) = self.scripts.get(&name) else {
            return Ok(None);
        };

        debug!(hook = %name, script = %path.display(), "Running hook script");
        let mut command = tokio::process::Command::new(path);
        command
            .env("PGSHIFT_HOOK", &name)
            .env("PGSHIFT_TABLE", &key.table)
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(field) = &key.field {
            command.env("PGSHIFT_FIELD", field);
        }

        let status = command
            .status()
            .await
            .with_context(|| format!("Failed to run hook script {}", path.display()))?;

        if !status.success() {
            warn!(hook = %name, status = %status, "Hook script failed");
        }
        Ok(Some(status.success()))
    }
}
