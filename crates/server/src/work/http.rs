// crates/server/src/work/http.rs
//! Thin HTTP adapter for paged JSON list endpoints.
//!
//! Enumerates work items from a source's search API one page at a time
//! and, per item, fetches the detail document. That is the whole job of
//! this adapter — parsing, rendering, and storing what comes back belongs
//! to the collaborators outside this system.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use docharvest_core::SourceConfig;

use super::{ItemError, ItemFilters, SourceError, SourceFactory, WorkItem, WorkSource};

/// Hard cap on pages per source, applied on top of the job's own
/// `max_pages` filter.
const PAGE_CEILING: u32 = 500;

/// Builds `HttpWorkSource`s sharing one connection pool.
pub struct HttpSourceFactory {
    client: reqwest::Client,
}

impl HttpSourceFactory {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("docharvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client");
        Self { client }
    }
}

impl Default for HttpSourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFactory for HttpSourceFactory {
    fn build(&self, config: &SourceConfig, filters: &ItemFilters) -> Box<dyn WorkSource> {
        Box::new(HttpWorkSource {
            client: self.client.clone(),
            config: config.clone(),
            filters: filters.clone(),
        })
    }
}

/// One page of search results.
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<WorkItem>,
    #[serde(default)]
    total_pages: Option<u32>,
}

struct HttpWorkSource {
    client: reqwest::Client,
    config: SourceConfig,
    filters: ItemFilters,
}

impl HttpWorkSource {
    fn detail_url(&self, item: &WorkItem) -> String {
        if item.url.starts_with("http://") || item.url.starts_with("https://") {
            return item.url.clone();
        }
        let base = self
            .config
            .detail_api
            .as_deref()
            .unwrap_or(&self.config.base_url);
        format!("{}/{}", base.trim_end_matches('/'), item.url.trim_start_matches('/'))
    }
}

#[async_trait]
impl WorkSource for HttpWorkSource {
    async fn enumerate(&self) -> Result<Vec<WorkItem>, SourceError> {
        let mut items = Vec::new();
        let max_pages = self.filters.max_pages.unwrap_or(PAGE_CEILING).min(PAGE_CEILING);

        let mut page = 1u32;
        loop {
            let mut request = self
                .client
                .get(&self.config.search_api)
                .query(&[("page", page.to_string())]);
            if !self.filters.keywords.is_empty() {
                request = request.query(&[("keywords", self.filters.keywords.join(","))]);
            }
            if let Some(start) = &self.filters.start_date {
                request = request.query(&[("start_date", start)]);
            }
            if let Some(end) = &self.filters.end_date {
                request = request.query(&[("end_date", end)]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::BadResponse(format!(
                    "search page {page} returned {status}"
                )));
            }
            let body: SearchPage = response
                .json()
                .await
                .map_err(|e| SourceError::BadResponse(e.to_string()))?;

            let empty = body.items.is_empty();
            items.extend(body.items);

            let last_page = match body.total_pages {
                Some(total) => page >= total,
                None => empty,
            };
            if last_page || page >= max_pages {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            source = %self.config.name,
            items = items.len(),
            pages = page,
            "enumeration complete"
        );
        Ok(items)
    }

    async fn process(&self, item: &WorkItem) -> Result<(), ItemError> {
        let url = self.detail_url(item);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ItemError::Status(status.as_u16()));
        }
        // Downstream rendering/storage consumes the body; the
        // coordinator only needs to know the fetch succeeded.
        let _ = response.bytes().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(detail_api: Option<&str>) -> HttpWorkSource {
        HttpWorkSource {
            client: reqwest::Client::new(),
            config: SourceConfig {
                name: "ministry".into(),
                base_url: "https://example.org".into(),
                search_api: "https://example.org/api/search".into(),
                detail_api: detail_api.map(String::from),
            },
            filters: ItemFilters::default(),
        }
    }

    fn item(url: &str) -> WorkItem {
        WorkItem {
            id: "1".into(),
            title: "Doc".into(),
            url: url.into(),
        }
    }

    #[test]
    fn test_absolute_item_url_used_verbatim() {
        let s = source(None);
        assert_eq!(
            s.detail_url(&item("https://cdn.example.org/doc/1")),
            "https://cdn.example.org/doc/1"
        );
    }

    #[test]
    fn test_relative_url_joins_base() {
        let s = source(None);
        assert_eq!(
            s.detail_url(&item("/doc/1")),
            "https://example.org/doc/1"
        );
    }

    #[test]
    fn test_relative_url_prefers_detail_api() {
        let s = source(Some("https://example.org/api/detail/"));
        assert_eq!(
            s.detail_url(&item("doc/1")),
            "https://example.org/api/detail/doc/1"
        );
    }

    #[test]
    fn test_search_page_parses_with_defaults() {
        let page: SearchPage = serde_json::from_str(r#"{}"#).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, None);

        let page: SearchPage = serde_json::from_str(
            r#"{"items": [{"id": "1", "title": "T", "url": "/d/1"}], "total_pages": 3}"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_pages, Some(3));
    }
}
