//! Client side of the project catalog: fetches years, project sets and
//! server version from the catalog API, orders project sets by their
//! `extras.sort_index` and publishes everything into one shared
//! [`AppStateStore`] that the presentation layer observes.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod orchestrator;
pub mod state;

pub use config::{load_settings, ClientSettings, Routes};
pub use error::{CatalogError, FetchCause, FetchError, InvalidRecordError, Operation};
pub use fetcher::{CatalogFetcher, HttpCatalogFetcher};
pub use normalize::{normalize, OrderedProjectList, ProjectEntry};
pub use orchestrator::{
    with_working_sentinel, Branch, CatalogEvent, Orchestrator, StartupHandle, StartupReport,
};
pub use state::{
    AppState, AppStatePatch, AppStateStore, ObserverId, StateChanged, StateField, YearList,
};
