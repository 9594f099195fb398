//! Document-retrieval adapter: by-id and by-name access patterns, with
//! the two documented fallbacks to the sentinel collection `"test"`
//! The upstream directory may be stale; a single retry against
//! the default avoids a user-visible failure for the common case.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::AdapterError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_COLLECTION: &str = "test";

/// The `{ids, documents, metadatas, distances}` wire shape,
/// consumed unchanged and then normalised to `SearchResult` by the
/// caller.
#[derive(Debug, Clone, Deserialize)]
pub struct DocQueryResult {
    #[serde(default)]
    pub ids: Vec<Vec<String>>,
    #[serde(default)]
    pub documents: Vec<Vec<String>>,
    #[serde(default)]
    pub metadatas: Vec<Vec<HashMap<String, serde_json::Value>>>,
    #[serde(default)]
    pub distances: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct DirectoryEntry {
    name: String,
    id: String,
}

#[async_trait]
pub trait DocRetrievalAdapter: Send + Sync {
    async fn query_doc(
        &self,
        token: Option<&str>,
        collection_id: &str,
        query: &str,
        k: usize,
    ) -> Result<DocQueryResult, AdapterError>;

    /// Resolves `name` → id via a directory listing, then delegates to
    /// `query_doc`. Two documented fallbacks: (1) unknown name falls back
    /// to `"test"`; (2) `collection_not_found` on query also falls back
    /// to `"test"`; failure of the fallback surfaces the original error.
    async fn query_doc_by_name(
        &self,
        token: Option<&str>,
        name: &str,
        query: &str,
        k: usize,
    ) -> Result<(DocQueryResult, String), AdapterError>;
}

pub struct HttpDocRetrievalAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocRetrievalAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn auth_token<'a>(&'a self, token: Option<&'a str>) -> Option<&'a str> {
        token.or(self.api_key.as_deref())
    }

    async fn list_directory(&self, token: Option<&str>) -> Result<Vec<DirectoryEntry>, AdapterError> {
        let mut req = self.client.get(format!("{}/collections", self.base_url));
        if let Some(token) = self.auth_token(token) {
            req = req.bearer_auth(token);
        }
        let response = req.timeout(DEFAULT_TIMEOUT).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    fn is_collection_not_found(err: &AdapterError) -> bool {
        match err {
            AdapterError::HttpStatus(404, _) => true,
            AdapterError::Upstream(msg) => msg.contains("collection_not_found"),
            _ => false,
        }
    }
}

#[async_trait]
impl DocRetrievalAdapter for HttpDocRetrievalAdapter {
    async fn query_doc(
        &self,
        token: Option<&str>,
        collection_id: &str,
        query: &str,
        k: usize,
    ) -> Result<DocQueryResult, AdapterError> {
        let mut req = self
            .client
            .post(format!("{}/collections/{}/query", self.base_url, collection_id));
        if let Some(token) = self.auth_token(token) {
            req = req.bearer_auth(token);
        }
        let response = req
            .json(&serde_json::json!({ "query": query, "k": k }))
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::HttpStatus(404, "collection_not_found".to_string()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    async fn query_doc_by_name(
        &self,
        token: Option<&str>,
        name: &str,
        query: &str,
        k: usize,
    ) -> Result<(DocQueryResult, String), AdapterError> {
        let directory = self.list_directory(token).await.unwrap_or_default();
        let resolved_id = directory
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.id.clone());

        let (collection_id, used_name) = match resolved_id {
            Some(id) => (id, name.to_string()),
            // Fallback (1): unknown name -> sentinel default.
            None => (DEFAULT_COLLECTION.to_string(), DEFAULT_COLLECTION.to_string()),
        };

        match self.query_doc(token, &collection_id, query, k).await {
            Ok(result) => Ok((result, used_name)),
            // Fallback (2): collection_not_found on query -> retry "test".
            Err(e) if Self::is_collection_not_found(&e) && used_name != DEFAULT_COLLECTION => {
                self.query_doc(token, DEFAULT_COLLECTION, query, k)
                    .await
                    .map(|r| (r, DEFAULT_COLLECTION.to_string()))
                    .map_err(|_| e) // fallback failure surfaces the original error
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_not_found_detection() {
        assert!(HttpDocRetrievalAdapter::is_collection_not_found(
            &AdapterError::HttpStatus(404, String::new())
        ));
        assert!(HttpDocRetrievalAdapter::is_collection_not_found(
            &AdapterError::Upstream("collection_not_found: no such id".into())
        ));
        assert!(!HttpDocRetrievalAdapter::is_collection_not_found(
            &AdapterError::Timeout
        ));
    }
}
