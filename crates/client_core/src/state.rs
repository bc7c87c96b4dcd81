use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::Serialize;
use shared::protocol::{ProjectRecord, VersionInfo};
use tokio::sync::broadcast;
use tracing::debug;

use crate::normalize::OrderedProjectList;

/// Years with the working-directory pseudo-year in front.
pub type YearList = Vec<String>;

const STATE_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub years: YearList,
    pub projects: OrderedProjectList,
    pub selected_year: Option<String>,
    pub selected_project: Option<ProjectRecord>,
    pub version_info: Option<VersionInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Years,
    Projects,
    SelectedYear,
    SelectedProject,
    VersionInfo,
}

/// A partial write to [`AppState`]. Fields left unset are not touched;
/// nullable fields can be set back to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppStatePatch {
    pub years: Option<YearList>,
    pub projects: Option<OrderedProjectList>,
    pub selected_year: Option<Option<String>>,
    pub selected_project: Option<Option<ProjectRecord>>,
    pub version_info: Option<Option<VersionInfo>>,
}

impl AppStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn years(mut self, years: YearList) -> Self {
        self.years = Some(years);
        self
    }

    pub fn projects(mut self, projects: OrderedProjectList) -> Self {
        self.projects = Some(projects);
        self
    }

    pub fn selected_year(mut self, year: Option<String>) -> Self {
        self.selected_year = Some(year);
        self
    }

    pub fn selected_project(mut self, project: Option<ProjectRecord>) -> Self {
        self.selected_project = Some(project);
        self
    }

    pub fn version_info(mut self, version_info: Option<VersionInfo>) -> Self {
        self.version_info = Some(version_info);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    pub fn fields(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        if self.years.is_some() {
            fields.push(StateField::Years);
        }
        if self.projects.is_some() {
            fields.push(StateField::Projects);
        }
        if self.selected_year.is_some() {
            fields.push(StateField::SelectedYear);
        }
        if self.selected_project.is_some() {
            fields.push(StateField::SelectedProject);
        }
        if self.version_info.is_some() {
            fields.push(StateField::VersionInfo);
        }
        fields
    }

    fn apply_to(self, state: &mut AppState) {
        if let Some(years) = self.years {
            state.years = years;
        }
        if let Some(projects) = self.projects {
            state.projects = projects;
        }
        if let Some(selected_year) = self.selected_year {
            state.selected_year = selected_year;
        }
        if let Some(selected_project) = self.selected_project {
            state.selected_project = selected_project;
        }
        if let Some(version_info) = self.version_info {
            state.version_info = version_info;
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateChanged {
    pub fields: Vec<StateField>,
    pub snapshot: AppState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&AppState, &[StateField]) + Send + Sync>;

struct StoreInner {
    state: AppState,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
}

/// The one shared, observable copy of the catalog view.
///
/// Every write goes through [`AppStateStore::update`]. A merge and the
/// notifications it triggers happen under a single lock, so observers only
/// ever see fully merged states, in the order the writes completed.
pub struct AppStateStore {
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<StateChanged>,
}

static GLOBAL_STORE: OnceLock<Arc<AppStateStore>> = OnceLock::new();

impl AppStateStore {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(StoreInner {
                state: AppState::default(),
                observers: Vec::new(),
                next_observer_id: 0,
            }),
            events,
        })
    }

    /// Process-wide instance, created empty on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_STORE.get_or_init(Self::new))
    }

    // An observer panic poisons the lock after the merge already finished,
    // so the guarded state is still whole.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> AppState {
        self.lock().state.clone()
    }

    /// Merges `patch` and notifies observers. Returns the fields written.
    ///
    /// Observers run on the calling thread while the store is locked and must
    /// not call back into the store.
    pub fn update(&self, patch: AppStatePatch) -> Vec<StateField> {
        let fields = patch.fields();
        if fields.is_empty() {
            return fields;
        }

        let mut guard = self.lock();
        patch.apply_to(&mut guard.state);
        debug!(?fields, "state: merged update");

        for (_, observer) in &guard.observers {
            observer(&guard.state, &fields);
        }
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(StateChanged {
                fields: fields.clone(),
                snapshot: guard.state.clone(),
            });
        }

        fields
    }

    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&AppState, &[StateField]) + Send + Sync + 'static,
    {
        let mut guard = self.lock();
        let id = ObserverId(guard.next_observer_id);
        guard.next_observer_id += 1;
        guard.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut guard = self.lock();
        let before = guard.observers.len();
        guard.observers.retain(|(observer_id, _)| *observer_id != id);
        guard.observers.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
