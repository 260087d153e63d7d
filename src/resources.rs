//! Thin JSON helpers for the dashboard's resource endpoints.
//!
//! Payloads are passed through as `serde_json::Value`; the page, post,
//! analytics, and report schemas belong to the backend.

use serde_json::Value;

use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;

/// Offset pagination shared by the list endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u32>,
    pub skip: Option<u32>,
}

impl Page {
    fn apply(self, mut options: RequestOptions) -> RequestOptions {
        if let Some(limit) = self.limit {
            options = options.query("limit", limit);
        }
        if let Some(skip) = self.skip {
            options = options.query("skip", skip);
        }
        options
    }
}

/// Optional inclusive date window (`YYYY-MM-DD`) or a look-back in days.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub days: Option<u32>,
}

impl Window {
    #[must_use]
    pub fn days(days: u32) -> Self {
        Self { days: Some(days), ..Self::default() }
    }

    fn apply(&self, mut options: RequestOptions) -> RequestOptions {
        if let Some(start) = &self.start_date {
            options = options.query("start_date", start);
        }
        if let Some(end) = &self.end_date {
            options = options.query("end_date", end);
        }
        if let Some(days) = self.days {
            options = options.query("days", days);
        }
        options
    }
}

impl ApiClient {
    #[must_use]
    pub fn pages(&self) -> Pages<'_> {
        Pages { client: self }
    }

    #[must_use]
    pub fn posts(&self) -> Posts<'_> {
        Posts { client: self }
    }

    #[must_use]
    pub fn analytics(&self) -> Analytics<'_> {
        Analytics { client: self }
    }

    #[must_use]
    pub fn reports(&self) -> Reports<'_> {
        Reports { client: self }
    }

    #[must_use]
    pub fn health(&self) -> Health<'_> {
        Health { client: self }
    }
}

// =============================================================================
// PAGES
// =============================================================================

/// Connected Facebook pages under `/pages`.
pub struct Pages<'a> {
    client: &'a ApiClient,
}

impl Pages<'_> {
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn list(&self, active_only: bool) -> Result<Value, ApiError> {
        self.client
            .get("/pages/", RequestOptions::default().query("active_only", active_only))
            .await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn get(&self, page_id: &str) -> Result<Value, ApiError> {
        self.client.get(&format!("/pages/{page_id}"), RequestOptions::default()).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn add(&self, page: &Value) -> Result<Value, ApiError> {
        self.client.post("/pages/", page).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn update(&self, page_id: &str, settings: &Value) -> Result<Value, ApiError> {
        self.client.put(&format!("/pages/{page_id}"), settings).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn remove(&self, page_id: &str) -> Result<Value, ApiError> {
        self.client.delete(&format!("/pages/{page_id}")).await
    }

    /// Ask the backend to pull fresh data from the Graph API.
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn sync(&self, page_id: &str) -> Result<Value, ApiError> {
        self.client.post(&format!("/pages/{page_id}/sync"), &Value::Null).await
    }
}

// =============================================================================
// POSTS
// =============================================================================

/// Filters for `GET /posts/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    pub page_id: Option<String>,
    pub post_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Synced page posts under `/posts`.
pub struct Posts<'a> {
    client: &'a ApiClient,
}

impl Posts<'_> {
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn list(&self, filter: &PostFilter, page: Page) -> Result<Value, ApiError> {
        let mut options = RequestOptions::default();
        for (key, value) in [
            ("page_id", &filter.page_id),
            ("post_type", &filter.post_type),
            ("start_date", &filter.start_date),
            ("end_date", &filter.end_date),
        ] {
            if let Some(value) = value {
                options = options.query(key, value);
            }
        }
        self.client.get("/posts/", page.apply(options)).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn get(&self, post_id: &str) -> Result<Value, ApiError> {
        self.client.get(&format!("/posts/{post_id}"), RequestOptions::default()).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn by_page(&self, page_id: &str, page: Page) -> Result<Value, ApiError> {
        self.client
            .get(&format!("/posts/page/{page_id}"), page.apply(RequestOptions::default()))
            .await
    }

    /// Posts ranked by `metric` (server default `engagement_rate`).
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn top_performing(
        &self,
        page_id: &str,
        metric: Option<&str>,
        limit: Option<u32>,
        days: Option<u32>,
    ) -> Result<Value, ApiError> {
        let mut options = RequestOptions::default();
        if let Some(metric) = metric {
            options = options.query("metric", metric);
        }
        if let Some(limit) = limit {
            options = options.query("limit", limit);
        }
        if let Some(days) = days {
            options = options.query("days", days);
        }
        self.client
            .get(&format!("/posts/page/{page_id}/top-performing"), options)
            .await
    }
}

// =============================================================================
// ANALYTICS
// =============================================================================

/// Aggregated insights under `/analytics`.
pub struct Analytics<'a> {
    client: &'a ApiClient,
}

impl Analytics<'_> {
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn page_summary(&self, page_id: &str, window: &Window) -> Result<Value, ApiError> {
        self.client
            .get(&format!("/analytics/pages/{page_id}/summary"), window.apply(RequestOptions::default()))
            .await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn page_insights(&self, page_id: &str, window: &Window, metric_type: Option<&str>) -> Result<Value, ApiError> {
        let mut options = window.apply(RequestOptions::default());
        if let Some(metric_type) = metric_type {
            options = options.query("metric_type", metric_type);
        }
        self.client
            .get(&format!("/analytics/pages/{page_id}/insights"), options)
            .await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn post_insights(&self, post_id: &str) -> Result<Value, ApiError> {
        self.client
            .get(&format!("/analytics/posts/{post_id}/insights"), RequestOptions::default())
            .await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn dashboard(&self, page_id: &str, days: Option<u32>) -> Result<Value, ApiError> {
        let mut options = RequestOptions::default();
        if let Some(days) = days {
            options = options.query("days", days);
        }
        self.client.get(&format!("/analytics/dashboard/{page_id}"), options).await
    }

    /// Side-by-side metrics for several pages.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] for an empty page list, otherwise
    /// transport or HTTP errors after 401 recovery.
    pub async fn compare(&self, page_ids: &[&str], days: Option<u32>) -> Result<Value, ApiError> {
        if page_ids.is_empty() {
            return Err(ApiError::Config("compare needs at least one page id".to_owned()));
        }
        let mut options = RequestOptions::default().query("page_ids", page_ids.join(","));
        if let Some(days) = days {
            options = options.query("days", days);
        }
        self.client.get("/analytics/compare", options).await
    }
}

// =============================================================================
// REPORTS
// =============================================================================

/// Generated reports under `/reports`.
pub struct Reports<'a> {
    client: &'a ApiClient,
}

impl Reports<'_> {
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn list(&self, status: Option<&str>, report_type: Option<&str>, page: Page) -> Result<Value, ApiError> {
        let mut options = RequestOptions::default();
        if let Some(status) = status {
            options = options.query("status_filter", status);
        }
        if let Some(report_type) = report_type {
            options = options.query("report_type", report_type);
        }
        self.client.get("/reports/", page.apply(options)).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn create(&self, report: &Value) -> Result<Value, ApiError> {
        self.client.post("/reports/", report).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn get(&self, report_id: &str) -> Result<Value, ApiError> {
        self.client.get(&format!("/reports/{report_id}"), RequestOptions::default()).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn update(&self, report_id: &str, changes: &Value) -> Result<Value, ApiError> {
        self.client.put(&format!("/reports/{report_id}"), changes).await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn delete(&self, report_id: &str) -> Result<Value, ApiError> {
        self.client.delete(&format!("/reports/{report_id}")).await
    }

    /// Request a download link (`download_url`, `file_size`, `format`).
    ///
    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn download_link(&self, report_id: &str) -> Result<Value, ApiError> {
        self.client
            .post(&format!("/reports/{report_id}/download"), &Value::Null)
            .await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors after 401 recovery.
    pub async fn summary(&self) -> Result<Value, ApiError> {
        self.client.get("/reports/summary/dashboard", RequestOptions::default()).await
    }
}

// =============================================================================
// HEALTH
// =============================================================================

/// Unauthenticated probes under `/health`.
pub struct Health<'a> {
    client: &'a ApiClient,
}

impl Health<'_> {
    /// # Errors
    ///
    /// Returns transport or HTTP errors.
    pub async fn check(&self) -> Result<Value, ApiError> {
        self.probe("/health/").await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors.
    pub async fn ready(&self) -> Result<Value, ApiError> {
        self.probe("/health/ready").await
    }

    /// # Errors
    ///
    /// Returns transport or HTTP errors.
    pub async fn live(&self) -> Result<Value, ApiError> {
        self.probe("/health/live").await
    }

    async fn probe(&self, path: &str) -> Result<Value, ApiError> {
        self.client
            .get(path, RequestOptions::default().without_auth().without_refresh())
            .await
    }
}

#[cfg(test)]
#[path = "resources_test.rs"]
mod tests;
