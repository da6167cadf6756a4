//! Application descriptors and the catalog that resolves them.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How an application is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// A native executable started as a direct child process.
    Native,
    /// A web application hosted by the out-of-process web runtime.
    Web,
}

impl AppKind {
    /// Returns the kind as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Web => "web",
        }
    }
}

impl std::fmt::Display for AppKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static metadata about an installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Application identifier (reverse-DNS by convention).
    pub id: String,

    /// Execution kind.
    pub kind: AppKind,

    /// Executable path for native applications, entry document for web
    /// applications.
    #[serde(default)]
    pub entry_point: String,

    /// Extra arguments passed to a native executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for a native executable.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment for a native executable.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Memory the application needs, in MB. Used both for admission and as
    /// the native quota. Zero disables both.
    #[serde(default)]
    pub required_memory_mb: u64,

    /// Locked applications cannot be launched.
    #[serde(default)]
    pub locked: bool,

    /// Launched when the session enters the Normal phase.
    #[serde(default)]
    pub boot_time: bool,

    /// Title of the default launch point.
    #[serde(default)]
    pub title: Option<String>,

    /// Name shown in menus.
    #[serde(default)]
    pub menu_name: Option<String>,
}

impl AppDescriptor {
    /// Creates a descriptor with defaults for everything but id, kind and
    /// entry point.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: AppKind, entry_point: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            entry_point: entry_point.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            required_memory_mb: 0,
            locked: false,
            boot_time: false,
            title: None,
            menu_name: None,
        }
    }

    /// Sets the memory requirement.
    #[must_use]
    pub const fn with_required_memory(mut self, mb: u64) -> Self {
        self.required_memory_mb = mb;
        self
    }

    /// Marks the descriptor locked.
    #[must_use]
    pub const fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Menu name, falling back to `"Application"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.menu_name.as_deref().unwrap_or("Application")
    }
}

/// Source of application descriptors.
pub trait AppCatalog: Send + Sync {
    /// Looks up a descriptor by application id.
    fn descriptor(&self, app_id: &str) -> Option<AppDescriptor>;

    /// Ids of every application flagged for launch at boot.
    fn boot_time_apps(&self) -> Vec<String>;
}

/// Catalog backed by the `[[apps]]` entries of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    apps: HashMap<String, AppDescriptor>,
    order: Vec<String>,
}

impl StaticCatalog {
    /// Builds a catalog from descriptors. Later duplicates replace earlier
    /// ones.
    #[must_use]
    pub fn new(descriptors: impl IntoIterator<Item = AppDescriptor>) -> Self {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            catalog.insert(descriptor);
        }
        catalog
    }

    /// Adds or replaces a descriptor.
    pub fn insert(&mut self, descriptor: AppDescriptor) {
        if !self.apps.contains_key(&descriptor.id) {
            self.order.push(descriptor.id.clone());
        }
        self.apps.insert(descriptor.id.clone(), descriptor);
    }

    /// Number of known applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl AppCatalog for StaticCatalog {
    fn descriptor(&self, app_id: &str) -> Option<AppDescriptor> {
        self.apps.get(app_id).cloned()
    }

    fn boot_time_apps(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.apps.get(*id).is_some_and(|d| d.boot_time))
            .cloned()
            .collect()
    }
}
