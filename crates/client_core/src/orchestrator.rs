use std::{fmt, sync::Arc};

use shared::domain::{is_working_year, ProjectId, WORKING_YEAR};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::CatalogError,
    fetcher::CatalogFetcher,
    normalize::normalize,
    state::{AppStatePatch, AppStateStore, StateField, YearList},
};

const CATALOG_EVENT_CAPACITY: usize = 64;

/// The independent fetch-and-publish paths run at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Years,
    WorkingDirectory,
    Version,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Years => "years",
            Self::WorkingDirectory => "working_directory",
            Self::Version => "version",
        })
    }
}

#[derive(Debug, Clone)]
pub enum CatalogEvent {
    BranchCompleted { branch: Branch },
    BranchFailed { branch: Branch, message: String },
}

/// Prepends the working-directory pseudo-year to the server's years.
pub fn with_working_sentinel(fetched: Vec<String>) -> YearList {
    let mut years = Vec::with_capacity(fetched.len() + 1);
    years.push(WORKING_YEAR.to_string());
    years.extend(fetched);
    years
}

pub struct Orchestrator {
    fetcher: Arc<dyn CatalogFetcher>,
    store: Arc<AppStateStore>,
    events: broadcast::Sender<CatalogEvent>,
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn CatalogFetcher>, store: Arc<AppStateStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(CATALOG_EVENT_CAPACITY);
        Arc::new(Self {
            fetcher,
            store,
            events,
        })
    }

    pub fn store(&self) -> &Arc<AppStateStore> {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    /// Fires the years, working-directory and version fetches without
    /// waiting on any of them. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> StartupHandle {
        info!("catalog: starting startup fetches");
        StartupHandle {
            years: self.spawn_branch(Branch::Years),
            working_directory: self.spawn_branch(Branch::WorkingDirectory),
            version: self.spawn_branch(Branch::Version),
        }
    }

    fn spawn_branch(self: &Arc<Self>, branch: Branch) -> JoinHandle<Result<(), CatalogError>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let result = match branch {
                Branch::Years => orchestrator.load_years().await,
                Branch::WorkingDirectory => orchestrator.load_working_directory().await,
                Branch::Version => orchestrator.load_version().await,
            };
            orchestrator.report(branch, &result);
            result
        })
    }

    fn report(&self, branch: Branch, result: &Result<(), CatalogError>) {
        let event = match result {
            Ok(()) => {
                debug!(%branch, "catalog: branch completed");
                CatalogEvent::BranchCompleted { branch }
            }
            Err(err) => {
                warn!(%branch, "catalog: branch failed: {err}");
                CatalogEvent::BranchFailed {
                    branch,
                    message: err.to_string(),
                }
            }
        };
        let _ = self.events.send(event);
    }

    async fn load_years(&self) -> Result<(), CatalogError> {
        let fetched = self.fetcher.fetch_years().await?;
        let years = with_working_sentinel(fetched);
        debug!(count = years.len(), "catalog: publishing years");
        self.store.update(AppStatePatch::new().years(years));
        Ok(())
    }

    async fn load_working_directory(&self) -> Result<(), CatalogError> {
        let raw = self.fetcher.fetch_projects_working_directory().await?;
        let projects = normalize(raw)?;
        debug!(
            count = projects.len(),
            "catalog: publishing working directory projects"
        );
        self.store.update(
            AppStatePatch::new()
                .projects(projects)
                .selected_year(Some(WORKING_YEAR.to_string())),
        );
        Ok(())
    }

    async fn load_version(&self) -> Result<(), CatalogError> {
        let version_info = self.fetcher.fetch_version().await?;
        self.store
            .update(AppStatePatch::new().version_info(Some(version_info)));
        Ok(())
    }

    /// Loads the projects of `year` (or of the working directory for the
    /// pseudo-year) and makes them the current list. The previous project
    /// selection is cleared. On failure the state is left as it was.
    pub async fn select_year(&self, year: &str) -> Result<Vec<StateField>, CatalogError> {
        info!(year, "catalog: selecting year");
        let raw = if is_working_year(year) {
            self.fetcher.fetch_projects_working_directory().await?
        } else {
            self.fetcher.fetch_projects_by_year(year).await?
        };
        let projects = normalize(raw)?;
        Ok(self.store.update(
            AppStatePatch::new()
                .projects(projects)
                .selected_year(Some(year.to_string()))
                .selected_project(None),
        ))
    }

    /// Selects a project out of the current list.
    pub fn select_project(&self, id: &ProjectId) -> Result<Vec<StateField>, CatalogError> {
        let record = self
            .store
            .get()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownProject(id.clone()))?;
        debug!(project = %id, "catalog: selecting project");
        Ok(self
            .store
            .update(AppStatePatch::new().selected_project(Some(record))))
    }
}

/// The running startup branches. Dropping it does not cancel them.
pub struct StartupHandle {
    years: JoinHandle<Result<(), CatalogError>>,
    working_directory: JoinHandle<Result<(), CatalogError>>,
    version: JoinHandle<Result<(), CatalogError>>,
}

impl StartupHandle {
    pub async fn wait(self) -> StartupReport {
        let (years, working_directory, version) =
            futures::future::join3(self.years, self.working_directory, self.version).await;
        StartupReport {
            years: flatten_join(Branch::Years, years),
            working_directory: flatten_join(Branch::WorkingDirectory, working_directory),
            version: flatten_join(Branch::Version, version),
        }
    }
}

fn flatten_join(
    branch: Branch,
    joined: Result<Result<(), CatalogError>, tokio::task::JoinError>,
) -> Result<(), CatalogError> {
    joined.unwrap_or_else(|err| {
        Err(CatalogError::Branch {
            branch,
            message: err.to_string(),
        })
    })
}

#[derive(Debug)]
pub struct StartupReport {
    pub years: Result<(), CatalogError>,
    pub working_directory: Result<(), CatalogError>,
    pub version: Result<(), CatalogError>,
}

impl StartupReport {
    pub fn failures(&self) -> Vec<(Branch, &CatalogError)> {
        [
            (Branch::Years, &self.years),
            (Branch::WorkingDirectory, &self.working_directory),
            (Branch::Version, &self.version),
        ]
        .into_iter()
        .filter_map(|(branch, result)| result.as_ref().err().map(|err| (branch, err)))
        .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().is_empty()
    }

    pub fn all_failed(&self) -> bool {
        self.failures().len() == 3
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
