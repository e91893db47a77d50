//! Remote JSON-over-HTTP backend.
//!
//! Each generation is one concrete index named
//! `{prefix}_{model}_{gen:06}`; readers go through the alias
//! `{prefix}_{model}`, which always points at exactly one index. A
//! rebuild fills a fresh hidden index, then promotion swaps the alias in
//! a single actions request.
//!
//! Transient transport failures (connection errors, 5xx, 429) are
//! retried with exponential backoff before surfacing as
//! `BackendUnavailable`.

mod compiler;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use weft_core::{
    DocumentId, Error, FieldKind, FieldName, FieldSpec, IndexMode, ModelType, Result,
    SpecRegistry,
};
use weft_query::QueryNode;

use crate::backend::{
    FacetCount, IndexGeneration, Ordering, Pagination, SearchBackend, SearchHit, WriteTarget,
};
use crate::document::{Document, FieldValue};
use compiler::{compile, compile_sort};

const AUTOCOMPLETE_LIMIT: u64 = 10;

enum RequestBody {
    None,
    Json(Value),
    Ndjson(String),
}

/// Search backend speaking the remote engine's JSON protocol.
pub struct RemoteBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    index_prefix: String,
    max_retries: usize,
    registry: Arc<SpecRegistry>,
    /// Highest generation id handed out per model type, seeded lazily
    /// from the alias the first time a generation is created.
    gen_ids: Mutex<HashMap<ModelType, u64>>,
}

impl RemoteBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        base_url: &str,
        username: Option<&str>,
        password: Option<&str>,
        index_prefix: &str,
        max_retries: usize,
        timeout_secs: u64,
        registry: Arc<SpecRegistry>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::backend_unavailable(name, e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            index_prefix: index_prefix.to_string(),
            max_retries,
            registry,
            gen_ids: Mutex::new(HashMap::new()),
        })
    }

    fn alias(&self, model_type: &ModelType) -> String {
        format!("{}_{}", self.index_prefix, model_type)
    }

    fn index(&self, generation: &IndexGeneration) -> String {
        format!(
            "{}_{}_{:06}",
            self.index_prefix, generation.model_type, generation.gen_id
        )
    }

    fn spec(&self, model_type: &ModelType) -> Result<Arc<FieldSpec>> {
        self.registry.get(model_type)
    }

    async fn send(&self, method: Method, path: &str, body: RequestBody) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        (|| async { self.attempt(&method, &url, &body).await })
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(self.max_retries),
            )
            .when(Error::is_transient)
            .await
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        body: &RequestBody,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        request = match body {
            RequestBody::None => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Ndjson(payload) => request
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(payload.clone()),
        };
        let response = request
            .send()
            .await
            .map_err(|e| Error::backend_unavailable(&self.name, e.to_string()))?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::backend_unavailable(
                &self.name,
                format!("{status} from {url}"),
            ));
        }
        Ok(response)
    }

    /// Read a success response body as JSON; any other status becomes an
    /// operation error carrying the body.
    async fn read_json(&self, response: reqwest::Response, context: &str) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::backend_unavailable(&self.name, e.to_string()))?;
        if !status.is_success() {
            return Err(Error::operation(format!(
                "remote {context}: {status}: {body}"
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::operation(format!("remote {context}: bad response body: {e}")))
    }

    /// Index names the alias currently points at, newest generation id
    /// first. `None` when the alias does not exist.
    async fn aliased_generations(&self, model_type: &ModelType) -> Result<Option<Vec<u64>>> {
        let alias = self.alias(model_type);
        let response = self
            .send(Method::GET, &format!("/_alias/{alias}"), RequestBody::None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = self.read_json(response, "resolving alias").await?;
        let Some(indexes) = body.as_object() else {
            return Ok(None);
        };
        let mut ids: Vec<u64> = indexes
            .keys()
            .filter_map(|index| index.rsplit('_').next())
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(Some(ids))
    }

    async fn resolve(&self, target: &WriteTarget) -> Result<IndexGeneration> {
        match target {
            WriteTarget::Generation(generation) => {
                if generation.backend != self.name {
                    return Err(Error::operation(format!(
                        "generation {generation} does not belong to backend '{}'",
                        self.name
                    )));
                }
                Ok(generation.clone())
            }
            WriteTarget::Live(model_type) => {
                self.live_generation(model_type).await?.ok_or_else(|| {
                    Error::operation(format!(
                        "no live generation for '{model_type}' on backend '{}'",
                        self.name
                    ))
                })
            }
        }
    }

    fn index_body(spec: &FieldSpec) -> Value {
        let mut properties = serde_json::Map::new();
        for field in spec.fields() {
            let mapping = match field.mode {
                IndexMode::Autocomplete => json!({
                    "type": "text",
                    "analyzer": "edgengram_analyzer",
                    "search_analyzer": "standard",
                }),
                IndexMode::Exact => match field.kind {
                    FieldKind::Numeric => json!({ "type": "double" }),
                    FieldKind::Date => json!({ "type": "date" }),
                    _ => json!({ "type": "keyword" }),
                },
                IndexMode::FullText => json!({ "type": "text" }),
            };
            properties.insert(field.name.to_string(), mapping);
        }
        json!({
            "settings": {
                "analysis": {
                    "filter": {
                        "edgengram": {
                            "type": "edge_ngram",
                            "min_gram": 1,
                            "max_gram": 15,
                        }
                    },
                    "analyzer": {
                        "edgengram_analyzer": {
                            "type": "custom",
                            "tokenizer": "standard",
                            "filter": ["lowercase", "edgengram"],
                        }
                    }
                }
            },
            "mappings": { "properties": properties },
        })
    }

    fn value_json(value: &FieldValue) -> Value {
        match value {
            FieldValue::Text(s) | FieldValue::Keyword(s) | FieldValue::Date(s) => json!(s),
            FieldValue::Number(n) => json!(n),
            FieldValue::Multi(members) => {
                Value::Array(members.iter().map(Self::value_json).collect())
            }
        }
    }

    /// Alias-swap actions for promotion. The removal set is a wildcard
    /// resolved by the engine while it applies the actions atomically,
    /// so concurrent promotions cannot each drop only the indices they
    /// observed and leave the alias pointing at two generations.
    fn swap_actions(&self, generation: &IndexGeneration) -> Value {
        let alias = self.alias(&generation.model_type);
        json!({
            "actions": [
                {
                    "remove": {
                        // No index carries the alias on the first promotion.
                        "index": format!("{alias}_*"),
                        "alias": alias,
                        "must_exist": false,
                    }
                },
                { "add": { "index": self.index(generation), "alias": alias } },
            ]
        })
    }

    fn facets_from_response(body: &Value) -> Result<Vec<FacetCount>> {
        let buckets = body["aggregations"]["facet"]["buckets"]
            .as_array()
            .ok_or_else(|| Error::operation("remote facet: response has no buckets"))?;
        let mut counts = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let key = &bucket["key"];
            // The aggregation maps missing values to the 0 sentinel.
            let value = if *key == json!(0) {
                None
            } else if let Some(s) = key.as_str() {
                Some(s.to_string())
            } else {
                Some(key.to_string())
            };
            counts.push(FacetCount {
                value,
                count: bucket["doc_count"].as_u64().unwrap_or(0),
            });
        }
        Ok(counts)
    }

    fn hits_from_response(body: &Value) -> Result<Vec<SearchHit>> {
        let hits = body["hits"]["hits"]
            .as_array()
            .ok_or_else(|| Error::operation("remote search: response has no hits array"))?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit["_id"]
                .as_str()
                .ok_or_else(|| Error::operation("remote search: hit without _id"))?;
            let id = id
                .parse::<DocumentId>()
                .map_err(|e| Error::operation(format!("remote search: bad _id '{id}': {e}")))?;
            let score = hit["_score"].as_f64().unwrap_or(0.0) as f32;
            results.push(SearchHit { id, score });
        }
        Ok(results)
    }
}

#[async_trait]
impl SearchBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_generation(&self, model_type: &ModelType) -> Result<IndexGeneration> {
        let spec = self.spec(model_type)?;

        // Seed the counter from the alias so restarts do not reuse the
        // live generation's id.
        let aliased = self
            .aliased_generations(model_type)
            .await?
            .and_then(|ids| ids.first().copied())
            .unwrap_or(0);
        let gen_id = {
            let mut gen_ids = self
                .gen_ids
                .lock()
                .map_err(|_| Error::operation("generation counter poisoned"))?;
            let entry = gen_ids.entry(model_type.clone()).or_insert(aliased);
            *entry = (*entry).max(aliased) + 1;
            *entry
        };
        let generation = IndexGeneration {
            model_type: model_type.clone(),
            gen_id,
            backend: self.name.clone(),
        };

        let index = self.index(&generation);
        let response = self
            .send(
                Method::PUT,
                &format!("/{index}"),
                RequestBody::Json(Self::index_body(&spec)),
            )
            .await?;
        self.read_json(response, "creating index").await?;
        log::debug!("created generation {generation} as index {index}");
        Ok(generation)
    }

    async fn add_documents(&self, target: &WriteTarget, docs: &[Document]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let generation = self.resolve(target).await?;
        let index = self.index(&generation);

        let mut payload = String::new();
        for doc in docs {
            if doc.id.model_type != generation.model_type {
                return Err(Error::operation(format!(
                    "document '{}' does not belong to model type '{}'",
                    doc.id, generation.model_type
                )));
            }
            let action = json!({ "index": { "_index": index, "_id": doc.id.to_string() } });
            let mut source = serde_json::Map::new();
            for (name, value) in &doc.values {
                source.insert(name.to_string(), Self::value_json(value));
            }
            payload.push_str(&action.to_string());
            payload.push('\n');
            payload.push_str(&Value::Object(source).to_string());
            payload.push('\n');
        }

        let response = self
            .send(Method::POST, "/_bulk", RequestBody::Ndjson(payload))
            .await?;
        let body = self.read_json(response, "bulk indexing").await?;
        if body["errors"].as_bool().unwrap_or(false) {
            let detail = body["items"]
                .as_array()
                .and_then(|items| {
                    items.iter().find_map(|item| {
                        let error = &item["index"]["error"];
                        error.is_object().then(|| error.to_string())
                    })
                })
                .unwrap_or_else(|| "unknown item failure".to_string());
            return Err(Error::operation(format!("remote bulk indexing: {detail}")));
        }
        Ok(())
    }

    async fn delete_document(&self, target: &WriteTarget, id: &DocumentId) -> Result<()> {
        let generation = self.resolve(target).await?;
        let index = self.index(&generation);
        let response = self
            .send(
                Method::DELETE,
                &format!("/{index}/_doc/{id}"),
                RequestBody::None,
            )
            .await?;
        // Deleting an absent document is a no-op.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.read_json(response, "deleting document").await?;
        Ok(())
    }

    async fn promote(&self, generation: &IndexGeneration) -> Result<()> {
        let index = self.index(generation);

        let exists = self
            .send(Method::HEAD, &format!("/{index}"), RequestBody::None)
            .await?;
        if exists.status() == StatusCode::NOT_FOUND {
            return Err(Error::not_found(format!("generation {generation}")));
        }

        let response = self
            .send(
                Method::POST,
                "/_aliases",
                RequestBody::Json(self.swap_actions(generation)),
            )
            .await?;
        self.read_json(response, "swapping alias").await?;
        log::info!("promoted generation {generation}");
        Ok(())
    }

    async fn retire(&self, generation: &IndexGeneration) -> Result<()> {
        if let Some(ids) = self.aliased_generations(&generation.model_type).await?
            && ids.contains(&generation.gen_id)
        {
            return Err(Error::operation(format!(
                "cannot retire live generation {generation}"
            )));
        }
        let index = self.index(generation);
        let response = self
            .send(Method::DELETE, &format!("/{index}"), RequestBody::None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::not_found(format!("generation {generation}")));
        }
        self.read_json(response, "deleting index").await?;
        log::debug!("retired generation {generation}");
        Ok(())
    }

    async fn live_generation(&self, model_type: &ModelType) -> Result<Option<IndexGeneration>> {
        let Some(ids) = self.aliased_generations(model_type).await? else {
            return Ok(None);
        };
        Ok(ids.first().map(|gen_id| IndexGeneration {
            model_type: model_type.clone(),
            gen_id: *gen_id,
            backend: self.name.clone(),
        }))
    }

    async fn search(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        page: Pagination,
        order: &Ordering,
    ) -> Result<Vec<SearchHit>> {
        if self.live_generation(model_type).await?.is_none() {
            log::warn!(
                "search against '{model_type}' on backend '{}' with no live generation",
                self.name
            );
            return Ok(Vec::new());
        }
        let spec = self.spec(model_type)?;
        let mut body = json!({
            "query": compile(query, &spec)?,
            "from": page.offset,
            "size": page.limit,
            "_source": false,
        });
        if let Ordering::Field { name, .. } = order {
            let known = spec
                .field(name)
                .is_some_and(|f| f.mode == IndexMode::Exact);
            if !known {
                return Err(Error::invalid_query(format!(
                    "cannot order by '{name}': not a filterable field of '{model_type}'"
                )));
            }
        }
        if let Some(sort) = compile_sort(order) {
            body["sort"] = sort;
        }

        let alias = self.alias(model_type);
        let response = self
            .send(
                Method::POST,
                &format!("/{alias}/_search"),
                RequestBody::Json(body),
            )
            .await?;
        let body = self.read_json(response, "search").await?;
        Self::hits_from_response(&body)
    }

    async fn autocomplete(
        &self,
        model_type: &ModelType,
        prefix: &str,
        field: &FieldName,
    ) -> Result<Vec<DocumentId>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let spec = self.spec(model_type)?;
        let supported = spec
            .field(field)
            .is_some_and(|f| f.mode == IndexMode::Autocomplete);
        if !supported {
            return Err(Error::invalid_query(format!(
                "'{field}' is not an autocomplete field of '{model_type}'"
            )));
        }
        if self.live_generation(model_type).await?.is_none() {
            log::warn!(
                "autocomplete against '{model_type}' on backend '{}' with no live generation",
                self.name
            );
            return Ok(Vec::new());
        }

        let body = json!({
            "query": { "match": { field.as_str(): { "query": prefix } } },
            "size": AUTOCOMPLETE_LIMIT,
            "_source": false,
        });
        let alias = self.alias(model_type);
        let response = self
            .send(
                Method::POST,
                &format!("/{alias}/_search"),
                RequestBody::Json(body),
            )
            .await?;
        let body = self.read_json(response, "autocomplete").await?;
        Ok(Self::hits_from_response(&body)?
            .into_iter()
            .map(|hit| hit.id)
            .collect())
    }

    async fn facet(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        field: &FieldName,
    ) -> Result<Vec<FacetCount>> {
        let spec = self.spec(model_type)?;
        let supported = spec
            .field(field)
            .is_some_and(|f| f.mode == IndexMode::Exact);
        if !supported {
            return Err(Error::invalid_query(format!(
                "cannot facet on '{field}': not a filterable field of '{model_type}'"
            )));
        }
        if self.live_generation(model_type).await?.is_none() {
            log::warn!(
                "facet against '{model_type}' on backend '{}' with no live generation",
                self.name
            );
            return Ok(Vec::new());
        }

        let body = json!({
            "query": compile(query, &spec)?,
            "size": 0,
            "aggregations": {
                "facet": { "terms": { "field": field.as_str(), "missing": 0 } }
            },
        });
        let alias = self.alias(model_type);
        let response = self
            .send(
                Method::POST,
                &format!("/{alias}/_search"),
                RequestBody::Json(body),
            )
            .await?;
        let body = self.read_json(response, "facet").await?;
        Self::facets_from_response(&body)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::SearchableField;

    fn backend() -> RemoteBackend {
        let registry = SpecRegistry::new();
        let spec = FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title").with_boost(2.0))
            .field(SearchableField::autocomplete("suggest"))
            .field(SearchableField::keyword("tag"))
            .field(SearchableField::numeric("views"))
            .field(SearchableField::date("published"))
            .build()
            .unwrap();
        registry.register(spec).unwrap();
        RemoteBackend::new(
            "cluster",
            "http://search:9200/",
            Some("user"),
            Some("secret"),
            "weft",
            2,
            5,
            Arc::new(registry),
        )
        .unwrap()
    }

    #[test]
    fn test_index_and_alias_names() {
        let backend = backend();
        let page = ModelType::new("page").unwrap();
        let generation = IndexGeneration {
            model_type: page.clone(),
            gen_id: 7,
            backend: "cluster".to_string(),
        };
        assert_eq!(backend.alias(&page), "weft_page");
        assert_eq!(backend.index(&generation), "weft_page_000007");
    }

    #[test]
    fn test_swap_actions_remove_resolves_server_side() {
        let backend = backend();
        let generation = IndexGeneration {
            model_type: ModelType::new("page").unwrap(),
            gen_id: 3,
            backend: "cluster".to_string(),
        };
        let body = backend.swap_actions(&generation);
        let actions = body["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        // A wildcard remove drops whatever is aliased at execution time,
        // not what this process last observed.
        assert_eq!(actions[0]["remove"]["index"], json!("weft_page_*"));
        assert_eq!(actions[0]["remove"]["alias"], json!("weft_page"));
        assert_eq!(actions[0]["remove"]["must_exist"], json!(false));
        assert_eq!(actions[1]["add"]["index"], json!("weft_page_000003"));
        assert_eq!(actions[1]["add"]["alias"], json!("weft_page"));
    }

    #[test]
    fn test_index_body_mappings() {
        let backend = backend();
        let spec = backend.spec(&ModelType::new("page").unwrap()).unwrap();
        let body = RemoteBackend::index_body(&spec);
        let properties = &body["mappings"]["properties"];
        assert_eq!(properties["title"]["type"], json!("text"));
        assert_eq!(properties["suggest"]["analyzer"], json!("edgengram_analyzer"));
        assert_eq!(properties["tag"]["type"], json!("keyword"));
        assert_eq!(properties["views"]["type"], json!("double"));
        assert_eq!(properties["published"]["type"], json!("date"));
        assert!(body["settings"]["analysis"]["analyzer"]["edgengram_analyzer"].is_object());
    }

    #[test]
    fn test_value_json() {
        assert_eq!(
            RemoteBackend::value_json(&FieldValue::Text("fox".into())),
            json!("fox")
        );
        assert_eq!(RemoteBackend::value_json(&FieldValue::Number(3.5)), json!(3.5));
        assert_eq!(
            RemoteBackend::value_json(&FieldValue::Multi(vec![
                FieldValue::Keyword("a".into()),
                FieldValue::Keyword("b".into()),
            ])),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_facets_from_response() {
        let body = json!({
            "aggregations": {
                "facet": {
                    "buckets": [
                        { "key": "news", "doc_count": 7 },
                        { "key": 0, "doc_count": 2 },
                    ]
                }
            }
        });
        let counts = RemoteBackend::facets_from_response(&body).unwrap();
        assert_eq!(
            counts,
            vec![
                FacetCount { value: Some("news".to_string()), count: 7 },
                FacetCount { value: None, count: 2 },
            ]
        );

        let bad = json!({ "aggregations": {} });
        assert!(RemoteBackend::facets_from_response(&bad).is_err());
    }

    #[test]
    fn test_hits_from_response() {
        let body = json!({
            "hits": {
                "hits": [
                    { "_id": "page:2", "_score": 1.5 },
                    { "_id": "page:1", "_score": null },
                ]
            }
        });
        let hits = RemoteBackend::hits_from_response(&body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.pk, "2");
        assert_eq!(hits[0].score, 1.5);
        assert_eq!(hits[1].score, 0.0);

        let bad = json!({ "hits": {} });
        assert!(RemoteBackend::hits_from_response(&bad).is_err());
    }
}
