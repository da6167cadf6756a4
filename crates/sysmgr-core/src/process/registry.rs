use std::collections::{BTreeMap, HashMap};

use super::{AppKind, ApplicationProcess, ProcessId};

/// Tracked application instances, indexed by process id and by app id.
///
/// Holds at most one instance per application id.
#[derive(Debug, Default)]
pub struct Registry {
    by_process: BTreeMap<ProcessId, ApplicationProcess>,
    by_app: HashMap<String, ProcessId>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an instance.
    ///
    /// If the application already has an entry it is evicted and returned.
    pub fn insert(&mut self, process: ApplicationProcess) -> Option<ApplicationProcess> {
        let evicted = self
            .by_app
            .get(process.app_id())
            .copied()
            .and_then(|old| self.remove(old));
        self.by_app
            .insert(process.app_id().to_string(), process.process_id());
        self.by_process.insert(process.process_id(), process);
        evicted
    }

    /// Removes the instance with this exact process id.
    ///
    /// The app id index is only cleared if it still points at this process.
    pub fn remove(&mut self, process_id: ProcessId) -> Option<ApplicationProcess> {
        let process = self.by_process.remove(&process_id)?;
        if self.by_app.get(process.app_id()) == Some(&process_id) {
            self.by_app.remove(process.app_id());
        }
        Some(process)
    }

    /// Removes every instance of one kind.
    pub fn remove_kind(&mut self, kind: AppKind) -> Vec<ApplicationProcess> {
        let ids: Vec<ProcessId> = self
            .by_process
            .values()
            .filter(|process| process.kind() == kind)
            .map(ApplicationProcess::process_id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Instance by process id.
    #[must_use]
    pub fn get(&self, process_id: ProcessId) -> Option<&ApplicationProcess> {
        self.by_process.get(&process_id)
    }

    /// Mutable instance by process id.
    pub fn get_mut(&mut self, process_id: ProcessId) -> Option<&mut ApplicationProcess> {
        self.by_process.get_mut(&process_id)
    }

    /// Process id of the running instance of an application.
    #[must_use]
    pub fn process_id_for(&self, app_id: &str) -> Option<ProcessId> {
        self.by_app.get(app_id).copied()
    }

    /// Instance by application id.
    #[must_use]
    pub fn by_app_id(&self, app_id: &str) -> Option<&ApplicationProcess> {
        self.process_id_for(app_id)
            .and_then(|process_id| self.by_process.get(&process_id))
    }

    /// All instances ordered by process id.
    pub fn iter(&self) -> impl Iterator<Item = &ApplicationProcess> {
        self.by_process.values()
    }

    /// All instances, mutable.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ApplicationProcess> {
        self.by_process.values_mut()
    }

    /// Process ids of every instance of one kind.
    #[must_use]
    pub fn ids_of_kind(&self, kind: AppKind) -> Vec<ProcessId> {
        self.by_process
            .values()
            .filter(|process| process.kind() == kind)
            .map(ApplicationProcess::process_id)
            .collect()
    }

    /// Number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_process.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_process.is_empty()
    }
}
