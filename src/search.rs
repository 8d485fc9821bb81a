use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{LibError, Result};
use crate::models::OrganizationId;

/// Contract with the external name-search engine. The engine owns relevance
/// ranking and text analysis; this side only moves documents and ids.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, id: OrganizationId, name: &str) -> Result<()>;
    async fn update(&self, id: OrganizationId, name: &str) -> Result<()>;
    async fn remove(&self, id: OrganizationId) -> Result<()>;
    /// Ids in best-effort relevance order, at most `limit` entries.
    async fn search_by_name(&self, text: &str, limit: usize) -> Result<Vec<OrganizationId>>;
}

pub const DEFAULT_INDEX_NAME: &str = "organizations";

/// Elasticsearch-backed [`SearchIndex`] over the HTTP document API.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: SearchDocument,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    id: i32,
}

fn es_err(public: &'static str, err: reqwest::Error) -> LibError {
    LibError::sync(public, anyhow!(err))
}

impl ElasticIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_index(base_url, DEFAULT_INDEX_NAME)
    }

    pub fn with_index(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            index: index.into(),
        }
    }

    fn doc_url(&self, id: OrganizationId) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }

    /// Creates the index when it does not exist yet. Mapping is left to the
    /// engine's dynamic defaults.
    pub async fn ensure_index(&self) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.index);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|err| es_err("Search index is unreachable", err))?;

        if response.status().is_success() {
            return Ok(());
        }

        let response = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|err| es_err("Failed to create search index", err))?;
        check_status("Failed to create search index", response)?;
        tracing::info!(index = %self.index, "created search index");
        Ok(())
    }
}

fn check_status(public: &'static str, response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(LibError::sync(
            public,
            anyhow!("search index responded with status {}", status),
        ))
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn index(&self, id: OrganizationId, name: &str) -> Result<()> {
        let response = self
            .client
            .put(self.doc_url(id))
            .json(&json!({ "id": id.0, "name": name }))
            .send()
            .await
            .map_err(|err| es_err("Failed to add organization to the search index", err))?;
        check_status("Failed to add organization to the search index", response)?;
        tracing::debug!(%id, "organization added to the search index");
        Ok(())
    }

    async fn update(&self, id: OrganizationId, name: &str) -> Result<()> {
        let url = format!("{}/{}/_update/{}", self.base_url, self.index, id);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "doc": { "name": name } }))
            .send()
            .await
            .map_err(|err| es_err("Failed to update organization in the search index", err))?;
        check_status("Failed to update organization in the search index", response)?;
        tracing::debug!(%id, "organization updated in the search index");
        Ok(())
    }

    async fn remove(&self, id: OrganizationId) -> Result<()> {
        let response = self
            .client
            .delete(self.doc_url(id))
            .send()
            .await
            .map_err(|err| es_err("Failed to remove organization from the search index", err))?;
        check_status("Failed to remove organization from the search index", response)?;
        tracing::debug!(%id, "organization removed from the search index");
        Ok(())
    }

    async fn search_by_name(&self, text: &str, limit: usize) -> Result<Vec<OrganizationId>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "query": { "match": { "name": text } },
                "size": limit,
            }))
            .send()
            .await
            .map_err(|err| LibError::unknown("Search request failed", anyhow!(err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LibError::unknown(
                "Search request failed",
                anyhow!("search index responded with status {}", status),
            ));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|err| LibError::unknown("Search response was malformed", anyhow!(err)))?;

        Ok(parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| OrganizationId(hit.source.id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{ElasticIndex, SearchResponse};
    use crate::models::OrganizationId;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let index = ElasticIndex::new("http://localhost:9200/");
        assert_eq!(
            index.doc_url(OrganizationId(7)),
            "http://localhost:9200/organizations/_doc/7"
        );
    }

    #[test]
    fn search_response_extracts_ids_in_order() {
        let body = serde_json::json!({
            "took": 3,
            "hits": {
                "total": { "value": 2 },
                "hits": [
                    { "_id": "2", "_score": 1.4, "_source": { "id": 2, "name": "Acme Corp" } },
                    { "_id": "9", "_score": 0.7, "_source": { "id": 9, "name": "Acme Labs" } },
                ],
            },
        });

        let parsed: SearchResponse =
            serde_json::from_value(body).expect("response should deserialize");
        let ids: Vec<i32> = parsed.hits.hits.iter().map(|hit| hit.source.id).collect();
        assert_eq!(ids, vec![2, 9]);
    }
}
