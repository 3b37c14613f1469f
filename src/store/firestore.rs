//! Cloud Firestore backend over the REST API.
//!
//! Each read is a single `runQuery` call with a structured query: one
//! `collectionId` plus `EQUAL` field filters, combined with `AND` when there
//! is more than one. Subcollection reads run the same query under the parent
//! document's path.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! provider = "firestore"
//! project_id = "acme-mail"
//! # database = "(default)"
//! # emulator_host = "localhost:8081"
//! ```
//!
//! # Authentication
//!
//! An OAuth access token is read from the variable named by
//! `store.access_token_env` (default `FIRESTORE_ACCESS_TOKEN`), e.g. the output
//! of `gcloud auth print-access-token`. Against the emulator the token is
//! optional and `owner` is sent when it is absent.
//!
//! # Values
//!
//! Firestore's typed values are decoded into plain JSON: integers arrive as
//! strings on the wire and become numbers, timestamps and references stay
//! strings, bytes stay base64, geo points become `{latitude, longitude}`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Map, Value};

use crate::config::StoreConfig;
use crate::models::{FilterSet, StoredDocument};

use super::DocumentStore;

const FIRESTORE_API: &str = "https://firestore.googleapis.com";

pub struct FirestoreStore {
    http: reqwest::Client,
    /// `.../v1/projects/{p}/databases/{d}` with no trailing slash.
    database_url: Url,
    token: Option<String>,
}

impl FirestoreStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let project = config
            .project_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("store.project_id required for Firestore"))?;

        let (base, default_token) = match &config.emulator_host {
            Some(host) => (format!("http://{}", host), Some("owner".to_string())),
            None => (FIRESTORE_API.to_string(), None),
        };

        let token = std::env::var(&config.access_token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .or(default_token);
        if token.is_none() {
            bail!(
                "{} environment variable not set (required for Firestore)",
                config.access_token_env
            );
        }

        let mut database_url = Url::parse(&base).context("invalid Firestore endpoint")?;
        database_url
            .path_segments_mut()
            .map_err(|_| anyhow!("Firestore endpoint cannot be a base URL"))?
            .clear()
            .extend(["v1", "projects", project, "databases", config.database.as_str()]);

        Ok(Self {
            http: reqwest::Client::new(),
            database_url,
            token,
        })
    }

    /// `runQuery` URL for documents directly under `parent_segments`.
    fn run_query_url(&self, parent_segments: &[&str]) -> Result<Url> {
        let mut url = self.database_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("Firestore endpoint cannot be a base URL"))?;
            match parent_segments.split_last() {
                None => {
                    segments.push("documents:runQuery");
                }
                Some((last, rest)) => {
                    segments.push("documents");
                    segments.extend(rest.iter().copied());
                    segments.push(&format!("{}:runQuery", last));
                }
            }
        }
        Ok(url)
    }

    async fn run_query(
        &self,
        parent_segments: &[&str],
        collection_id: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>> {
        let url = self.run_query_url(parent_segments)?;
        let body = structured_query(collection_id, filters);

        let mut request = self.http.post(url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.context("Firestore request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read Firestore response")?;
        if !status.is_success() {
            bail!("Firestore error {}: {}", status, text);
        }

        let rows: Vec<Value> =
            serde_json::from_str(&text).context("invalid Firestore runQuery response")?;
        Ok(rows.iter().filter_map(parse_row).collect())
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn name(&self) -> &str {
        "firestore"
    }

    async fn query_collection(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>> {
        self.run_query(&[], collection, filters).await
    }

    async fn query_subcollection(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>> {
        self.run_query(&[collection, parent_id], subcollection, filters)
            .await
    }
}

// ============ Query encoding ============

fn structured_query(collection_id: &str, filters: &FilterSet) -> Value {
    let mut field_filters: Vec<Value> = filters
        .iter()
        .map(|(field, value)| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field },
                    "op": "EQUAL",
                    "value": encode_value(value),
                }
            })
        })
        .collect();

    let mut query = json!({ "from": [{ "collectionId": collection_id }] });
    match field_filters.len() {
        0 => {}
        1 => query["where"] = field_filters.remove(0),
        _ => {
            query["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": field_filters }
            })
        }
    }
    json!({ "structuredQuery": query })
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

// ============ Response decoding ============

/// One `runQuery` row → document. Rows without a `document` (e.g. a bare
/// `readTime` on empty results) are skipped.
fn parse_row(row: &Value) -> Option<StoredDocument> {
    let doc = row.get("document")?;
    let name = doc.get("name")?.as_str()?;
    let id = name.rsplit('/').next()?.to_string();
    let fields = doc
        .get("fields")
        .and_then(Value::as_object)
        .map(decode_fields)
        .unwrap_or_default();
    Some(StoredDocument::new(id, fields))
}

fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        }),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| vals.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => inner.clone(),
    }
}
