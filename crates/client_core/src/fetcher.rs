use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::protocol::{ProjectMap, VersionInfo, YearsPayload, YEAR_PLACEHOLDER};
use tracing::debug;
use url::Url;

use crate::{
    config::{ClientSettings, Routes},
    error::{FetchCause, FetchError, Operation},
};

/// Read access to the remote catalog. One call, one request; nothing is
/// retried here.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_projects_by_year(&self, year: &str) -> Result<ProjectMap, FetchError>;
    async fn fetch_projects_working_directory(&self) -> Result<ProjectMap, FetchError>;
    /// Years in server order, which callers must not rely on.
    async fn fetch_years(&self) -> Result<Vec<String>, FetchError>;
    async fn fetch_version(&self) -> Result<VersionInfo, FetchError>;
}

pub struct HttpCatalogFetcher {
    http: Client,
    base_url: Url,
    routes: Routes,
}

impl HttpCatalogFetcher {
    pub fn new(http: Client, base_url: Url, routes: Routes) -> Self {
        Self {
            http,
            base_url,
            routes,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let base_url = settings.base_url()?;
        let mut builder = Client::builder();
        if let Some(timeout) = settings.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self::new(http, base_url, settings.routes.clone()))
    }

    fn resolve(&self, route: &str, year: Option<&str>) -> Result<Url, FetchCause> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                FetchCause::InvalidUrl(format!("{} cannot carry a path", self.base_url))
            })?;
            segments.pop_if_empty();
            for segment in route.split('/').filter(|segment| !segment.is_empty()) {
                match year {
                    Some(year) if segment == YEAR_PLACEHOLDER => segments.push(year),
                    _ => segments.push(segment),
                };
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        route: &str,
        year: Option<&str>,
    ) -> Result<T, FetchError> {
        let result = self.request(operation, route, year).await;
        if let Err(err) = &result {
            debug!(operation = %operation, "catalog: {err}");
        }
        result.map_err(|cause| FetchError::new(operation, cause))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        operation: Operation,
        route: &str,
        year: Option<&str>,
    ) -> Result<T, FetchCause> {
        let url = self.resolve(route, year)?;
        debug!(operation = %operation, url = %url, "catalog: fetching");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(FetchCause::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status { status });
        }

        let body = response.bytes().await.map_err(FetchCause::Body)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch_projects_by_year(&self, year: &str) -> Result<ProjectMap, FetchError> {
        self.get_json(
            Operation::ProjectsByYear,
            &self.routes.projects_by_year,
            Some(year),
        )
        .await
    }

    async fn fetch_projects_working_directory(&self) -> Result<ProjectMap, FetchError> {
        self.get_json(
            Operation::ProjectsWorkingDirectory,
            &self.routes.working_directory,
            None,
        )
        .await
    }

    async fn fetch_years(&self) -> Result<Vec<String>, FetchError> {
        let years: YearsPayload = self
            .get_json(Operation::Years, &self.routes.years, None)
            .await?;
        Ok(years.0)
    }

    async fn fetch_version(&self) -> Result<VersionInfo, FetchError> {
        self.get_json(Operation::Version, &self.routes.version, None)
            .await
    }
}

#[cfg(test)]
#[path = "tests/fetcher_tests.rs"]
mod tests;
