use super::*;
use crate::{
    config::ClientSettings,
    error::{FetchCause, FetchError, Operation},
    fetcher::HttpCatalogFetcher,
    state::AppState,
};
use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use shared::protocol::{ProjectMap, ProjectRecord, VersionInfo};
use std::{collections::HashMap, sync::Mutex as StdMutex};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

type Reply<T> = Result<T, FetchError>;

fn failure(operation: Operation, status: reqwest::StatusCode) -> FetchError {
    FetchError::new(operation, FetchCause::Status { status })
}

fn project_map(value: Value) -> ProjectMap {
    serde_json::from_value(value).expect("project map")
}

fn working_projects() -> ProjectMap {
    project_map(json!({
        "p2": { "extras": { "sort_index": 2 } },
        "p1": { "extras": { "sort_index": 1 } },
    }))
}

fn ids(state: &AppState) -> Vec<String> {
    state.projects.ids().map(|id| id.to_string()).collect()
}

/// A fetch that only resolves once the test hands it a reply.
struct Gate<T> {
    operation: Operation,
    rx: Mutex<Option<oneshot::Receiver<Reply<T>>>>,
}

impl<T> Gate<T> {
    fn new(operation: Operation) -> (Self, oneshot::Sender<Reply<T>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                operation,
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }

    async fn wait(&self) -> Reply<T> {
        let rx = self.rx.lock().await.take();
        let unavailable = || failure(self.operation, reqwest::StatusCode::SERVICE_UNAVAILABLE);
        match rx {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(unavailable())),
            None => Err(unavailable()),
        }
    }
}

struct GatedFetcher {
    years: Gate<Vec<String>>,
    working_directory: Gate<ProjectMap>,
    version: Gate<VersionInfo>,
}

struct Replies {
    years: oneshot::Sender<Reply<Vec<String>>>,
    working_directory: oneshot::Sender<Reply<ProjectMap>>,
    version: oneshot::Sender<Reply<VersionInfo>>,
}

fn gated() -> (Arc<GatedFetcher>, Replies) {
    let (years, years_tx) = Gate::new(Operation::Years);
    let (working_directory, working_tx) = Gate::new(Operation::ProjectsWorkingDirectory);
    let (version, version_tx) = Gate::new(Operation::Version);
    (
        Arc::new(GatedFetcher {
            years,
            working_directory,
            version,
        }),
        Replies {
            years: years_tx,
            working_directory: working_tx,
            version: version_tx,
        },
    )
}

#[async_trait]
impl CatalogFetcher for GatedFetcher {
    async fn fetch_projects_by_year(&self, _year: &str) -> Result<ProjectMap, FetchError> {
        Err(failure(
            Operation::ProjectsByYear,
            reqwest::StatusCode::NOT_FOUND,
        ))
    }

    async fn fetch_projects_working_directory(&self) -> Result<ProjectMap, FetchError> {
        self.working_directory.wait().await
    }

    async fn fetch_years(&self) -> Result<Vec<String>, FetchError> {
        self.years.wait().await
    }

    async fn fetch_version(&self) -> Result<VersionInfo, FetchError> {
        self.version.wait().await
    }
}

/// Answers immediately from fixed data and records what was asked.
#[derive(Default)]
struct StaticFetcher {
    years: Option<Vec<String>>,
    working_directory: Option<ProjectMap>,
    by_year: HashMap<String, ProjectMap>,
    version: Option<VersionInfo>,
    calls: StdMutex<Vec<(Operation, Option<String>)>>,
}

impl StaticFetcher {
    fn record(&self, operation: Operation, year: Option<&str>) {
        self.calls
            .lock()
            .expect("calls")
            .push((operation, year.map(str::to_string)));
    }

    fn calls(&self) -> Vec<(Operation, Option<String>)> {
        self.calls.lock().expect("calls").clone()
    }
}

#[async_trait]
impl CatalogFetcher for StaticFetcher {
    async fn fetch_projects_by_year(&self, year: &str) -> Result<ProjectMap, FetchError> {
        self.record(Operation::ProjectsByYear, Some(year));
        self.by_year
            .get(year)
            .cloned()
            .ok_or_else(|| failure(Operation::ProjectsByYear, reqwest::StatusCode::NOT_FOUND))
    }

    async fn fetch_projects_working_directory(&self) -> Result<ProjectMap, FetchError> {
        self.record(Operation::ProjectsWorkingDirectory, None);
        self.working_directory.clone().ok_or_else(|| {
            failure(
                Operation::ProjectsWorkingDirectory,
                reqwest::StatusCode::BAD_GATEWAY,
            )
        })
    }

    async fn fetch_years(&self) -> Result<Vec<String>, FetchError> {
        self.record(Operation::Years, None);
        self.years
            .clone()
            .ok_or_else(|| failure(Operation::Years, reqwest::StatusCode::BAD_GATEWAY))
    }

    async fn fetch_version(&self) -> Result<VersionInfo, FetchError> {
        self.record(Operation::Version, None);
        self.version.clone().ok_or_else(|| {
            failure(
                Operation::Version,
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            )
        })
    }
}

fn full_static_fetcher() -> StaticFetcher {
    StaticFetcher {
        years: Some(vec!["2020".into(), "2019".into()]),
        working_directory: Some(working_projects()),
        by_year: HashMap::from([(
            "2019".to_string(),
            project_map(json!({
                "b": { "extras": { "sort_index": "R002" } },
                "a": { "extras": { "sort_index": "R010" } },
            })),
        )]),
        version: Some(VersionInfo::new(json!({ "version": "3.9.0" }))),
        ..StaticFetcher::default()
    }
}

#[test]
fn sentinel_goes_in_front_of_server_years() {
    assert_eq!(
        with_working_sentinel(vec!["2020".into(), "2019".into()]),
        vec!["working", "2020", "2019"]
    );
    assert_eq!(with_working_sentinel(Vec::new()), vec!["working"]);
}

#[tokio::test]
async fn start_returns_before_any_fetch_resolves() {
    let (fetcher, replies) = gated();
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));

    let handle = orchestrator.start();
    assert_eq!(store.get(), AppState::default());

    tokio::task::yield_now().await;
    assert_eq!(store.get(), AppState::default());

    replies.years.send(Ok(vec!["2020".into()])).expect("years");
    replies
        .working_directory
        .send(Ok(working_projects()))
        .expect("working");
    replies
        .version
        .send(Ok(VersionInfo::new(json!("3.9.0"))))
        .expect("version");

    let report = handle.wait().await;
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn branches_publish_in_whatever_order_they_complete() {
    let (fetcher, replies) = gated();
    let store = AppStateStore::new();
    let mut changes = store.subscribe();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));
    let handle = orchestrator.start();

    replies
        .version
        .send(Ok(VersionInfo::new(json!({ "version": "3.9.0" }))))
        .expect("version");
    let changed = changes.recv().await.expect("version change");
    assert_eq!(changed.fields, vec![StateField::VersionInfo]);
    assert!(changed.snapshot.years.is_empty());
    assert!(changed.snapshot.projects.is_empty());

    replies
        .working_directory
        .send(Ok(working_projects()))
        .expect("working");
    let changed = changes.recv().await.expect("projects change");
    assert_eq!(
        changed.fields,
        vec![StateField::Projects, StateField::SelectedYear]
    );
    assert_eq!(ids(&changed.snapshot), vec!["p1", "p2"]);
    assert!(changed.snapshot.years.is_empty());

    replies
        .years
        .send(Ok(vec!["2020".into(), "2019".into()]))
        .expect("years");
    let changed = changes.recv().await.expect("years change");
    assert_eq!(changed.fields, vec![StateField::Years]);
    assert_eq!(changed.snapshot.years, vec!["working", "2020", "2019"]);

    assert!(handle.wait().await.all_succeeded());

    let state = store.get();
    assert_eq!(state.years, vec!["working", "2020", "2019"]);
    assert_eq!(ids(&state), vec!["p1", "p2"]);
    assert_eq!(state.selected_year.as_deref(), Some("working"));
    assert_eq!(
        state.version_info,
        Some(VersionInfo::new(json!({ "version": "3.9.0" })))
    );
}

#[tokio::test]
async fn version_failure_leaves_other_fields_populated() {
    let fetcher = Arc::new(StaticFetcher {
        version: None,
        ..full_static_fetcher()
    });
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));
    let mut events = orchestrator.subscribe_events();

    let report = orchestrator.start().wait().await;

    assert!(report.years.is_ok());
    assert!(report.working_directory.is_ok());
    match &report.version {
        Err(CatalogError::Fetch(err)) => assert_eq!(err.operation, Operation::Version),
        other => panic!("unexpected version result: {other:?}"),
    }
    assert_eq!(report.failures().len(), 1);
    assert!(!report.all_failed());

    let state = store.get();
    assert_eq!(state.years, vec!["working", "2020", "2019"]);
    assert_eq!(ids(&state), vec!["p1", "p2"]);
    assert_eq!(state.version_info, None);

    let mut completed = Vec::new();
    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            CatalogEvent::BranchCompleted { branch } => completed.push(branch),
            CatalogEvent::BranchFailed { branch, message } => failed.push((branch, message)),
        }
    }
    assert_eq!(completed.len(), 2);
    assert!(completed.contains(&Branch::Years));
    assert!(completed.contains(&Branch::WorkingDirectory));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, Branch::Version);
    assert!(failed[0].1.contains("version fetch failed"));
}

#[tokio::test]
async fn invalid_record_publishes_nothing_for_that_branch() {
    let fetcher = Arc::new(StaticFetcher {
        working_directory: Some(project_map(json!({
            "p1": { "extras": { "sort_index": 1 } },
            "p2": { "extras": {} },
        }))),
        ..full_static_fetcher()
    });
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));

    let report = orchestrator.start().wait().await;

    match &report.working_directory {
        Err(CatalogError::InvalidRecord(err)) => assert_eq!(err.identifier.as_str(), "p2"),
        other => panic!("unexpected working directory result: {other:?}"),
    }
    let state = store.get();
    assert!(state.projects.is_empty());
    assert_eq!(state.selected_year, None);
    assert_eq!(state.years, vec!["working", "2020", "2019"]);
    assert!(state.version_info.is_some());
}

#[tokio::test]
async fn every_branch_failing_is_reported() {
    let fetcher = Arc::new(StaticFetcher::default());
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));

    let report = orchestrator.start().wait().await;

    assert!(report.all_failed());
    let branches: Vec<Branch> = report.failures().into_iter().map(|(b, _)| b).collect();
    assert_eq!(
        branches,
        vec![Branch::Years, Branch::WorkingDirectory, Branch::Version]
    );
    assert_eq!(store.get(), AppState::default());
}

struct PanickingVersionFetcher;

#[async_trait]
impl CatalogFetcher for PanickingVersionFetcher {
    async fn fetch_projects_by_year(&self, _year: &str) -> Result<ProjectMap, FetchError> {
        Ok(ProjectMap::new())
    }

    async fn fetch_projects_working_directory(&self) -> Result<ProjectMap, FetchError> {
        Ok(ProjectMap::new())
    }

    async fn fetch_years(&self) -> Result<Vec<String>, FetchError> {
        Ok(Vec::new())
    }

    async fn fetch_version(&self) -> Result<VersionInfo, FetchError> {
        panic!("version decoder blew up")
    }
}

#[tokio::test]
async fn panicking_branch_is_reported_and_others_complete() {
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(Arc::new(PanickingVersionFetcher), Arc::clone(&store));

    let report = orchestrator.start().wait().await;

    assert!(matches!(
        report.version,
        Err(CatalogError::Branch {
            branch: Branch::Version,
            ..
        })
    ));
    assert!(report.years.is_ok());
    assert_eq!(store.get().years, vec!["working"]);
    assert_eq!(store.get().selected_year.as_deref(), Some("working"));
}

#[tokio::test]
async fn select_year_loads_that_year_and_clears_selection() {
    let fetcher = Arc::new(full_static_fetcher());
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher.clone(), Arc::clone(&store));
    orchestrator.start().wait().await;
    orchestrator
        .select_project(&ProjectId::from("p1"))
        .expect("select p1");
    assert!(store.get().selected_project.is_some());

    let written = orchestrator.select_year("2019").await.expect("2019");

    assert_eq!(
        written,
        vec![
            StateField::Projects,
            StateField::SelectedYear,
            StateField::SelectedProject
        ]
    );
    let state = store.get();
    assert_eq!(ids(&state), vec!["b", "a"]);
    assert_eq!(state.selected_year.as_deref(), Some("2019"));
    assert_eq!(state.selected_project, None);
    assert!(fetcher
        .calls()
        .contains(&(Operation::ProjectsByYear, Some("2019".to_string()))));
}

#[tokio::test]
async fn select_working_year_refetches_working_directory() {
    let fetcher = Arc::new(full_static_fetcher());
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher.clone(), Arc::clone(&store));

    orchestrator.select_year("2019").await.expect("2019");
    orchestrator.select_year("working").await.expect("working");

    let state = store.get();
    assert_eq!(ids(&state), vec!["p1", "p2"]);
    assert_eq!(state.selected_year.as_deref(), Some("working"));
    assert_eq!(
        fetcher.calls(),
        vec![
            (Operation::ProjectsByYear, Some("2019".to_string())),
            (Operation::ProjectsWorkingDirectory, None),
        ]
    );
}

#[tokio::test]
async fn failed_year_selection_keeps_previous_state() {
    let fetcher = Arc::new(full_static_fetcher());
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));
    orchestrator.start().wait().await;
    let before = store.get();

    let err = orchestrator
        .select_year("1999")
        .await
        .expect_err("unknown year");

    assert!(matches!(err, CatalogError::Fetch(ref fetch) if fetch.operation == Operation::ProjectsByYear));
    assert_eq!(store.get(), before);
}

#[tokio::test]
async fn select_project_copies_record_from_current_list() {
    let fetcher = Arc::new(full_static_fetcher());
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(fetcher, Arc::clone(&store));
    orchestrator.start().wait().await;

    orchestrator
        .select_project(&ProjectId::from("p2"))
        .expect("select p2");
    assert_eq!(
        store.get().selected_project,
        Some(ProjectRecord::new(json!({ "extras": { "sort_index": 2 } })))
    );

    let err = orchestrator
        .select_project(&ProjectId::from("missing"))
        .expect_err("unknown project");
    assert!(matches!(err, CatalogError::UnknownProject(ref id) if id.as_str() == "missing"));
    assert_eq!(
        store.get().selected_project,
        Some(ProjectRecord::new(json!({ "extras": { "sort_index": 2 } })))
    );
}

async fn spawn_catalog_server(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_startup_survives_broken_version_endpoint() {
    let app = Router::new()
        .route("/api/projects/year", get(|| async { Json(json!([2020, 2019])) }))
        .route(
            "/api/full_projects/workingdir",
            get(|| async {
                Json(json!({
                    "p2": { "extras": { "sort_index": 2 } },
                    "p1": { "extras": { "sort_index": 1 } },
                }))
            }),
        )
        .route(
            "/api/version",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let server_url = spawn_catalog_server(app).await;
    let fetcher = HttpCatalogFetcher::from_settings(&ClientSettings {
        server_url,
        ..ClientSettings::default()
    })
    .expect("fetcher");
    let store = AppStateStore::new();
    let orchestrator = Orchestrator::new(Arc::new(fetcher), Arc::clone(&store));

    let report = orchestrator.start().wait().await;

    assert!(report.years.is_ok());
    assert!(report.working_directory.is_ok());
    assert!(report.version.is_err());
    let state = store.get();
    assert_eq!(state.years, vec!["working", "2020", "2019"]);
    assert_eq!(ids(&state), vec!["p1", "p2"]);
    assert_eq!(state.selected_year.as_deref(), Some("working"));
    assert_eq!(state.version_info, None);
}
