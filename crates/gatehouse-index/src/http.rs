//! Client for an Elasticsearch-compatible REST endpoint.
//!
//! Writes pass `refresh=true` so a document is searchable as soon as the
//! call returns.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use gatehouse_core::{IndexedAuthorizationDocument, ResourceId};

use crate::config::IndexOptions;
use crate::error::IndexError;
use crate::traits::SearchIndex;

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<IndexedAuthorizationDocument>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpSearchIndex {
    client: Client,
    base_url: Url,
    index_name: String,
}

impl HttpSearchIndex {
    pub fn new(base_url: &str, options: IndexOptions) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;
        let base_url = Url::parse(base_url)
            .map_err(|e| IndexError::Unavailable(format!("invalid index url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::Unavailable(format!(
                "invalid index url {base_url}"
            )));
        }

        Ok(Self {
            client,
            base_url,
            index_name: options.index_name,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn url(&self, segments: &[&str], refresh: bool) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.push(&self.index_name);
            path.extend(segments);
        }
        if refresh {
            url.query_pairs_mut().append_pair("refresh", "true");
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!(%method, %url, "search index request");
        self.client.request(method, url)
    }

    async fn send(builder: RequestBuilder) -> Result<Response, IndexError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::from_status(status, body))
    }

    /// Like `send`, but a 404 yields `None`.
    async fn send_allow_missing(builder: RequestBuilder) -> Result<Option<Response>, IndexError> {
        match Self::send(builder).await {
            Ok(response) => Ok(Some(response)),
            Err(IndexError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn bulk(&self, body: String) -> Result<BulkResponse, IndexError> {
        let builder = self
            .request(Method::POST, self.url(&["_bulk"], true))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response: BulkResponse = Self::send(builder).await?.json().await?;
        Ok(response)
    }

    /// Creates the index with keyword mappings unless it already exists.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        let mappings = json!({
            "mappings": {
                "properties": {
                    "resourceId": { "type": "keyword" },
                    "ancestors": { "type": "keyword" },
                    "groups": { "type": "keyword" },
                    "users": { "type": "keyword" },
                    "updatedAt": { "type": "long" }
                }
            }
        });
        let builder = self.request(Method::PUT, self.url(&[], false)).json(&mappings);
        match Self::send(builder).await {
            Ok(_) => {
                tracing::info!(index = %self.index_name, "search index created");
                Ok(())
            }
            Err(IndexError::Rejected { status: 400, ref message })
                if message.contains("resource_already_exists_exception") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_by_query(&self, query: Value) -> Result<usize, IndexError> {
        let builder = self
            .request(Method::POST, self.url(&["_delete_by_query"], true))
            .json(&json!({ "query": query }));
        let Some(response) = Self::send_allow_missing(builder).await? else {
            return Ok(0);
        };
        let body: DeleteByQueryResponse = response.json().await?;
        Ok(to_count(body.deleted))
    }
}

fn to_count(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn first_bulk_failure(items: &[Value]) -> Option<(u16, String)> {
    items.iter().find_map(|item| {
        let action = item.as_object()?.values().next()?;
        let error = action.get("error")?;
        let status = action
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(500);
        Some((status, error.to_string()))
    })
}

impl SearchIndex for HttpSearchIndex {
    async fn index(&self, document: &IndexedAuthorizationDocument) -> Result<(), IndexError> {
        let url = self.url(&["_doc", document.resource_id.as_str()], true);
        Self::send(self.request(Method::PUT, url).json(document)).await?;
        Ok(())
    }

    async fn index_bulk(&self, documents: &[IndexedAuthorizationDocument]) -> Result<(), IndexError> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for document in documents {
            body.push_str(&json!({ "index": { "_id": document.resource_id } }).to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(document)?);
            body.push('\n');
        }

        let response = self.bulk(body).await?;
        if response.errors {
            let (status, message) = first_bulk_failure(&response.items)
                .unwrap_or((500, "bulk indexing reported errors".to_string()));
            return Err(IndexError::Rejected { status, message });
        }
        Ok(())
    }

    async fn delete(&self, resource_id: &ResourceId) -> Result<bool, IndexError> {
        let url = self.url(&["_doc", resource_id.as_str()], true);
        let response = Self::send_allow_missing(self.request(Method::DELETE, url)).await?;
        Ok(response.is_some())
    }

    async fn delete_bulk(&self, resource_ids: &[ResourceId]) -> Result<usize, IndexError> {
        if resource_ids.is_empty() {
            return Ok(0);
        }

        let mut body = String::new();
        for resource_id in resource_ids {
            body.push_str(&json!({ "delete": { "_id": resource_id } }).to_string());
            body.push('\n');
        }

        let response = self.bulk(body).await?;
        let deleted = response
            .items
            .iter()
            .filter(|item| {
                item.pointer("/delete/status").and_then(Value::as_u64)
                    == Some(u64::from(StatusCode::OK.as_u16()))
            })
            .count();
        Ok(deleted)
    }

    async fn delete_descendants(&self, resource_id: &ResourceId) -> Result<usize, IndexError> {
        self.delete_by_query(json!({ "term": { "ancestors": resource_id } }))
            .await
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let removed = self.delete_by_query(json!({ "match_all": {} })).await?;
        tracing::debug!(index = %self.index_name, removed, "search index cleared");
        Ok(())
    }

    async fn get(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<IndexedAuthorizationDocument>, IndexError> {
        let url = self.url(&["_doc", resource_id.as_str()], false);
        let Some(response) = Self::send_allow_missing(self.request(Method::GET, url)).await? else {
            return Ok(None);
        };
        let body: GetResponse = response.json().await?;
        if !body.found {
            return Ok(None);
        }
        body.source
            .map(Some)
            .ok_or_else(|| IndexError::InvalidResponse("document without _source".to_string()))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let url = self.url(&["_count"], false);
        let Some(response) = Self::send_allow_missing(self.request(Method::GET, url)).await? else {
            return Ok(0);
        };
        let body: CountResponse = response.json().await?;
        Ok(to_count(body.count))
    }
}
