use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credentials::TokenSource;
use crate::error::KVError;
use crate::namespace;
use crate::traits::KVStore;

/// Public Cloud Datastore endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://datastore.googleapis.com";

/// Name of the single property holding an entry's value.
pub const VALUE_PROPERTY: &str = "Value";

/// Connection settings for a Cloud Datastore project.
#[derive(Debug, Clone, Default)]
pub struct DatastoreConfig {
    /// Google Cloud project holding the entities.
    pub project_id: String,

    /// Service-account JSON key. Required unless `endpoint` points at an
    /// emulator, in which case requests are sent unauthenticated.
    pub credentials_file: Option<PathBuf>,

    /// Endpoint override (e.g. `http://localhost:8081` for the emulator).
    /// Defaults to [`DEFAULT_ENDPOINT`].
    pub endpoint: Option<String>,
}

// ── Datastore v1 REST wire types ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionId {
    project_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathElement {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Key {
    partition_id: PartitionId,
    path: Vec<PathElement>,
}

impl Key {
    fn name(&self) -> Option<&str> {
        self.path.last().and_then(|p| p.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    exclude_from_indexes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entity {
    key: Key,
    #[serde(default)]
    properties: BTreeMap<String, PropertyValue>,
}

impl Entity {
    fn value(&self) -> Result<String, KVError> {
        self.properties
            .get(VALUE_PROPERTY)
            .and_then(|p| p.string_value.clone())
            .ok_or_else(|| {
                KVError::Serialization(format!(
                    "entity {:?} has no string {} property",
                    self.key.name(),
                    VALUE_PROPERTY
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityResult {
    entity: Entity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest {
    keys: Vec<Key>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    found: Vec<EntityResult>,
    #[serde(default)]
    deferred: Vec<Key>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Mutation {
    #[serde(skip_serializing_if = "Option::is_none")]
    upsert: Option<Entity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delete: Option<Key>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest {
    mode: &'static str,
    mutations: Vec<Mutation>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindExpression {
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Query {
    kind: Vec<KindExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryRequest {
    partition_id: PartitionId,
    query: Query,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultBatch {
    #[serde(default)]
    entity_results: Vec<EntityResult>,
    #[serde(default)]
    end_cursor: Option<String>,
    #[serde(default)]
    more_results: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunQueryResponse {
    batch: QueryResultBatch,
}

// ── Store ───────────────────────────────────────────────────────────

struct Connection {
    client: Client,
    auth: Option<TokenSource>,
}

/// DatastoreStore is the remote KVStore backed by Google Cloud Datastore.
///
/// Entities are addressed by `(kind = silo, name = key)` in the configured
/// project and carry a single unindexed string property `Value`.
///
/// Every call is a blocking HTTP round trip. Failures are surfaced as
/// `TransientNetwork`/`Unavailable`/`AuthFailed` and are never retried here.
/// Callers on an async runtime should go through a blocking-task pool.
pub struct DatastoreStore {
    kind: String,
    project_id: String,
    base_url: String,
    conn: RwLock<Option<Connection>>,
}

impl DatastoreStore {
    /// Connect to the project in `config` and use `namespace` as the entity kind.
    ///
    /// A one-entity startup query is issued so that bad credentials surface
    /// as `AuthFailed` right here rather than on the first plugin call. Every
    /// other failure of that query (unreachable endpoint, unknown project, a
    /// body that is not a Datastore response) is reported as `ConnectFailed`.
    pub fn open(namespace: &str, config: &DatastoreConfig) -> Result<Self, KVError> {
        namespace::validate(namespace)?;
        if config.project_id.is_empty() {
            return Err(KVError::InvalidConfig("datastore project id is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| KVError::OpenFailed(format!("cannot build HTTP client: {}", e)))?;

        let auth = match (&config.credentials_file, &config.endpoint) {
            (Some(path), _) => Some(TokenSource::from_file(path, client.clone())?),
            (None, Some(_)) => None,
            (None, None) => {
                return Err(KVError::InvalidConfig(
                    "a credentials file is required for the datastore".to_string(),
                ));
            }
        };

        let identity = auth
            .as_ref()
            .map_or("unauthenticated", |a| a.client_email())
            .to_string();

        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        let store = Self {
            kind: namespace.to_string(),
            project_id: config.project_id.clone(),
            base_url: format!("{}/v1/projects/{}", endpoint, config.project_id),
            conn: RwLock::new(Some(Connection { client, auth })),
        };

        store.run_query(None, Some(1)).map_err(|e| match e {
            e @ (KVError::AuthFailed(_) | KVError::InvalidConfig(_) | KVError::OpenFailed(_)) => e,
            other => KVError::ConnectFailed(format!("startup query failed: {}", other)),
        })?;

        info!(
            "DatastoreStore: connected silo {:?} to project {} at {} as {}",
            namespace, store.project_id, endpoint, identity
        );
        Ok(store)
    }

    /// The entity kind (silo name) used for every key.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn key(&self, name: &str) -> Key {
        Key {
            partition_id: PartitionId {
                project_id: self.project_id.clone(),
            },
            path: vec![PathElement {
                kind: self.kind.clone(),
                name: Some(name.to_string()),
            }],
        }
    }

    fn call<Req, Resp>(&self, method: &str, body: &Req, write: bool) -> Result<Resp, KVError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let guard = self
            .conn
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let conn = guard.as_ref().ok_or(KVError::Closed)?;

        let url = format!("{}:{}", self.base_url, method);
        let mut req = conn.client.post(&url).json(body);
        if let Some(auth) = &conn.auth {
            req = req.bearer_auth(auth.token()?);
        }

        let resp = req
            .send()
            .map_err(|e| KVError::TransientNetwork(format!("{} {}: {}", method, url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(status_error(method, status, &text, write));
        }

        resp.json::<Resp>()
            .map_err(|e| KVError::Serialization(format!("{} response: {}", method, e)))
    }

    fn commit(&self, mutation: Mutation) -> Result<(), KVError> {
        let req = CommitRequest {
            mode: "NON_TRANSACTIONAL",
            mutations: vec![mutation],
        };
        let _: IgnoredAny = self.call("commit", &req, true)?;
        Ok(())
    }

    fn run_query(
        &self,
        start_cursor: Option<String>,
        limit: Option<i32>,
    ) -> Result<QueryResultBatch, KVError> {
        let req = RunQueryRequest {
            partition_id: PartitionId {
                project_id: self.project_id.clone(),
            },
            query: Query {
                kind: vec![KindExpression {
                    name: self.kind.clone(),
                }],
                start_cursor,
                limit,
            },
        };
        let resp: RunQueryResponse = self.call("runQuery", &req, false)?;
        Ok(resp.batch)
    }
}

/// Map a non-success HTTP status onto the store's error kinds.
fn status_error(method: &str, status: StatusCode, body: &str, write: bool) -> KVError {
    let msg = format!("{} returned {}: {}", method, status, body.trim());
    match status.as_u16() {
        401 | 403 => KVError::AuthFailed(msg),
        429 | 500 | 502 | 503 | 504 => KVError::Unavailable(msg),
        _ if write => KVError::WriteFailed(msg),
        _ => KVError::Storage(msg),
    }
}

impl KVStore for DatastoreStore {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let req = LookupRequest {
            keys: vec![self.key(key)],
        };
        let resp: LookupResponse = self.call("lookup", &req, false)?;

        if !resp.deferred.is_empty() {
            return Err(KVError::Unavailable(format!("lookup of {:?} was deferred", key)));
        }
        match resp.found.into_iter().next() {
            Some(result) => result.entity.value().map(Some),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        let mut properties = BTreeMap::new();
        properties.insert(
            VALUE_PROPERTY.to_string(),
            PropertyValue {
                string_value: Some(value.to_string()),
                exclude_from_indexes: true,
            },
        );
        self.commit(Mutation {
            upsert: Some(Entity {
                key: self.key(key),
                properties,
            }),
            delete: None,
        })
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.commit(Mutation {
            upsert: None,
            delete: Some(self.key(key)),
        })
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError> {
        let mut results = Vec::new();
        let mut cursor = None;

        loop {
            let batch = self.run_query(cursor.take(), None)?;
            let page_len = batch.entity_results.len();

            for result in batch.entity_results {
                let Some(name) = result.entity.key.name() else {
                    continue;
                };
                if name.starts_with(prefix) {
                    results.push((name.to_string(), result.entity.value()?));
                }
            }

            let done = batch.more_results.as_deref() == Some("NO_MORE_RESULTS")
                || batch.more_results.is_none();
            if done || page_len == 0 || batch.end_cursor.is_none() {
                break;
            }
            cursor = batch.end_cursor;
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("DatastoreStore: scanned {} entries of {}", results.len(), self.kind);
        Ok(results)
    }

    fn close(&self) -> Result<(), KVError> {
        let mut guard = self
            .conn
            .write()
            .map_err(|e| KVError::CloseFailed(e.to_string()))?;
        match guard.take() {
            Some(conn) => {
                drop(conn);
                debug!("DatastoreStore: closed silo {:?}", self.kind);
                Ok(())
            }
            None => Err(KVError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let s = |code: u16, write: bool| {
            status_error("commit", StatusCode::from_u16(code).unwrap(), "", write)
        };
        assert!(matches!(s(401, false), KVError::AuthFailed(_)));
        assert!(matches!(s(403, true), KVError::AuthFailed(_)));
        assert!(matches!(s(429, true), KVError::Unavailable(_)));
        assert!(matches!(s(503, false), KVError::Unavailable(_)));
        assert!(matches!(s(400, true), KVError::WriteFailed(_)));
        assert!(matches!(s(400, false), KVError::Storage(_)));
    }

    #[test]
    fn upsert_wire_format() {
        let mut properties = BTreeMap::new();
        properties.insert(
            VALUE_PROPERTY.to_string(),
            PropertyValue {
                string_value: Some("4".into()),
                exclude_from_indexes: true,
            },
        );
        let req = CommitRequest {
            mode: "NON_TRANSACTIONAL",
            mutations: vec![Mutation {
                upsert: Some(Entity {
                    key: Key {
                        partition_id: PartitionId {
                            project_id: "youppi".into(),
                        },
                        path: vec![PathElement {
                            kind: "karma".into(),
                            name: Some("alice".into()),
                        }],
                    },
                    properties,
                }),
                delete: None,
            }],
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "mode": "NON_TRANSACTIONAL",
                "mutations": [{
                    "upsert": {
                        "key": {
                            "partitionId": {"projectId": "youppi"},
                            "path": [{"kind": "karma", "name": "alice"}]
                        },
                        "properties": {
                            "Value": {"stringValue": "4", "excludeFromIndexes": true}
                        }
                    }
                }]
            })
        );
    }

    #[test]
    fn query_batch_tolerates_missing_fields() {
        let batch: RunQueryResponse = serde_json::from_str(
            r#"{"batch":{"entityResultType":"FULL","moreResults":"NO_MORE_RESULTS"}}"#,
        )
        .unwrap();
        assert!(batch.batch.entity_results.is_empty());
        assert_eq!(batch.batch.more_results.as_deref(), Some("NO_MORE_RESULTS"));
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let config = DatastoreConfig {
            project_id: "youppi".into(),
            ..Default::default()
        };
        let err = DatastoreStore::open("karma", &config).err().unwrap();
        assert!(matches!(err, KVError::InvalidConfig(_)));
    }

    #[test]
    fn unreachable_endpoint_is_connect_failure() {
        let config = DatastoreConfig {
            project_id: "youppi".into(),
            credentials_file: None,
            endpoint: Some("http://127.0.0.1:1".into()),
        };
        let err = DatastoreStore::open("karma", &config).err().unwrap();
        assert!(matches!(err, KVError::ConnectFailed(_)), "got {:?}", err);
    }
}
