//! Request/response server module.
//!
//! Exposes the graph queries as JSON requests. Each request is one object
//! with a `method` and optional `params`; each response is an envelope that
//! either carries a `result` or an `error` with a machine-readable `kind`.
//!
//! ```json
//! {"id": 1, "method": "find_path", "params": {"from": "e1", "to": "e9", "maxHops": 4}}
//! {"id": 1, "ok": true, "result": {"path": {"hops": 2, "strength": 0.36, "elements": [...]}}}
//! ```
//!
//! [`GraphServer::run_stdio`] serves newline-delimited requests on stdin and
//! writes one response line per request to stdout. Requests are handled
//! concurrently, so responses can come back out of order; clients match them
//! by `id`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::graph::PathOutcome;
use crate::models::{EntityId, EntityType};
use crate::query::format::{format_path, PathView, ViewGraph, ViewLink, ViewNode};
use crate::query::{
    parse_entity_types, EntityListQuery, EntityPage, GraphQueries, GraphSearchQuery, PathQuery,
    QueryError, SearchOutcome,
};
use crate::storage::StorageError;

/// Shown when a search matches no entity.
pub const NO_ENTITIES_MESSAGE: &str = "No entities found";

/// Shown when two entities are not connected within the hop bound.
pub const NO_PATH_MESSAGE: &str = "No path found between entities";

/// Errors that can occur while serving requests.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed request or invalid parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing store cannot be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Reading requests or writing responses failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other unexpected errors
    #[error("Server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Machine-readable error kind sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::NotFound(_) => "not_found",
            ServerError::StoreUnavailable(_) => "store_unavailable",
            ServerError::Io(_) | ServerError::Internal(_) => "internal",
        }
    }
}

impl From<QueryError> for ServerError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidQuery(msg) => ServerError::InvalidRequest(msg),
            QueryError::EntityNotFound(id) => ServerError::NotFound(format!("entity '{id}'")),
            QueryError::Storage(StorageError::Unavailable(msg)) => {
                ServerError::StoreUnavailable(msg)
            }
            QueryError::Storage(other) => ServerError::Internal(other.to_string()),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Parameters for `get_graph`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetGraphParams {
    /// Number of entities to return (default 100)
    pub limit: Option<i64>,
}

/// Parameters for `search_graph`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchGraphParams {
    pub query: String,

    /// Entity type names, matched case-insensitively
    pub entity_types: Vec<String>,

    /// Hops to expand around matches (default 2)
    pub max_distance: Option<i64>,
}

/// Parameters for `find_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindPathParams {
    pub from: String,
    pub to: String,

    /// Longest path to consider (default 5)
    #[serde(default)]
    pub max_hops: Option<i64>,
}

/// Parameters for `list_entities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListEntitiesParams {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Response payload for `search_graph`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchGraphResponse {
    pub nodes: Vec<ViewNode>,
    pub links: Vec<ViewLink>,

    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<SearchOutcome> for SearchGraphResponse {
    fn from(outcome: SearchOutcome) -> Self {
        match outcome {
            SearchOutcome::Graph(view) => Self {
                nodes: view.nodes,
                links: view.links,
                truncated: view.truncated,
                message: None,
            },
            SearchOutcome::NoMatches => Self {
                nodes: Vec::new(),
                links: Vec::new(),
                truncated: false,
                message: Some(NO_ENTITIES_MESSAGE.to_string()),
            },
        }
    }
}

/// Response payload for `find_path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindPathResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathView>,

    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<PathOutcome> for FindPathResponse {
    fn from(outcome: PathOutcome) -> Self {
        match outcome {
            PathOutcome::Found(path) => Self {
                path: Some(format_path(&path)),
                truncated: false,
                message: None,
            },
            PathOutcome::NoPath { truncated } => Self {
                path: None,
                truncated,
                message: Some(NO_PATH_MESSAGE.to_string()),
            },
        }
    }
}

/// Incoming request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    /// Echoed back unchanged so clients can match responses
    #[serde(default)]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default)]
    pub params: Value,
}

/// Error details in a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Outgoing response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, err: &ServerError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of requests handled at once
    pub max_concurrent_requests: usize,

    /// Per-request time budget; traversals still running past it return
    /// truncated results
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 100,
            request_timeout_secs: 30,
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> ServerResult<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| ServerError::InvalidRequest(format!("invalid params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> ServerResult<Value> {
    serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))
}

/// Serves [`GraphQueries`] over JSON requests.
pub struct GraphServer<Q: GraphQueries> {
    queries: Q,
    config: ServerConfig,
}

impl<Q: GraphQueries> GraphServer<Q> {
    /// Create a server.
    ///
    /// # Arguments
    /// * `queries` - Query engine answering requests
    /// * `config` - Server configuration
    pub fn new(queries: Q, config: ServerConfig) -> Self {
        Self { queries, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(Duration::from_secs(self.config.request_timeout_secs))
    }

    /// Handle a `get_graph` request.
    ///
    /// # Errors
    /// Returns `ServerError` if the parameters are invalid or the query fails
    pub async fn get_graph(&self, params: GetGraphParams) -> ServerResult<ViewGraph> {
        Ok(self.queries.get_graph(params.limit).await?)
    }

    /// Handle a `search_graph` request.
    ///
    /// # Errors
    /// Returns `ServerError` if the parameters are invalid or the query fails
    pub async fn search_graph(&self, params: SearchGraphParams) -> ServerResult<SearchGraphResponse> {
        let query = GraphSearchQuery {
            query: params.query,
            entity_types: parse_entity_types(&params.entity_types)?,
            max_distance: params.max_distance,
            deadline: self.deadline(),
        };
        let outcome = self.queries.search_graph(&query).await?;
        Ok(outcome.into())
    }

    /// Handle a `find_path` request.
    ///
    /// # Errors
    /// Returns `ServerError::NotFound` if an endpoint does not exist, or
    /// another `ServerError` if the parameters are invalid or the query fails
    pub async fn find_path(&self, params: FindPathParams) -> ServerResult<FindPathResponse> {
        let query = PathQuery {
            from: EntityId::new(params.from.trim()),
            to: EntityId::new(params.to.trim()),
            max_hops: params.max_hops,
            deadline: self.deadline(),
        };
        let outcome = self.queries.find_shortest_path(&query).await?;
        Ok(outcome.into())
    }

    /// Handle a `list_entities` request.
    ///
    /// # Errors
    /// Returns `ServerError` if the parameters are invalid or the query fails
    pub async fn list_entities(&self, params: ListEntitiesParams) -> ServerResult<EntityPage> {
        let entity_type = params
            .entity_type
            .as_deref()
            .map(str::parse::<EntityType>)
            .transpose()
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        let query = EntityListQuery {
            entity_type,
            search: params.search,
            page: params.page,
            limit: params.limit,
        };
        Ok(self.queries.list_entities(&query).await?)
    }

    /// Route a request to its handler and serialize the result.
    ///
    /// # Errors
    /// Returns `ServerError::InvalidRequest` for an unknown method or bad
    /// params, otherwise whatever the handler returns
    pub async fn dispatch(&self, method: &str, params: Value) -> ServerResult<Value> {
        match method {
            "get_graph" => to_result(&self.get_graph(parse_params(params)?).await?),
            "search_graph" => to_result(&self.search_graph(parse_params(params)?).await?),
            "find_path" => to_result(&self.find_path(parse_params(params)?).await?),
            "list_entities" => to_result(&self.list_entities(parse_params(params)?).await?),
            other => Err(ServerError::InvalidRequest(format!("unknown method '{other}'"))),
        }
    }

    /// Handle one raw request line and build its response. Never fails;
    /// errors become failure responses.
    pub async fn handle_line(&self, line: &str) -> Response {
        let envelope: RequestEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = ServerError::InvalidRequest(format!("malformed request: {e}"));
                return Response::failure(None, &err);
            }
        };

        let started = Instant::now();
        let result = self.dispatch(&envelope.method, envelope.params).await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                debug!(method = %envelope.method, ?elapsed, "request handled");
                Response::success(envelope.id, value)
            }
            Err(err) => {
                warn!(method = %envelope.method, kind = err.kind(), error = %err, "request failed");
                Response::failure(envelope.id, &err)
            }
        }
    }
}

fn encode_response(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(r#"{{"ok":false,"error":{{"kind":"internal","message":"{e}"}}}}"#)
    })
}

fn log_join_result(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "request task failed");
    }
}

impl<Q: GraphQueries + 'static> GraphServer<Q> {
    /// Serve newline-delimited JSON requests from `reader`, writing one
    /// response line per request to `writer`, until `reader` hits EOF.
    ///
    /// A line that is not valid UTF-8 gets an `invalid_request` response
    /// like any other malformed request. On a read failure, requests already
    /// accepted are still answered before the error is returned.
    ///
    /// # Errors
    /// Returns `ServerError::Io` if reading or writing fails
    pub async fn serve<Rd, Wr>(self: Arc<Self>, mut reader: Rd, mut writer: Wr) -> ServerResult<()>
    where
        Rd: AsyncBufRead + Unpin,
        Wr: AsyncWrite + Unpin + Send + 'static,
    {
        let slots = self.config.max_concurrent_requests.max(1);
        let (tx, mut rx) = mpsc::channel::<String>(slots);

        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let permits = Arc::new(Semaphore::new(slots));
        let mut tasks = JoinSet::new();
        let mut buf = Vec::new();
        let mut received = 0usize;

        let read_result: ServerResult<()> = loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join_result(joined);
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim().to_string(),
                Err(e) => {
                    received += 1;
                    warn!(error = %e, "request line is not valid UTF-8");
                    let err = ServerError::InvalidRequest(format!("request is not valid UTF-8: {e}"));
                    // The writer only goes away after the read loop ends.
                    let _ = tx.send(encode_response(&Response::failure(None, &err))).await;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            received += 1;

            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => break Err(ServerError::Internal(e.to_string())),
            };
            let server = Arc::clone(&self);
            let tx = tx.clone();
            tasks.spawn(async move {
                let response = server.handle_line(&line).await;
                drop(permit);
                // The writer only goes away after every task has finished.
                let _ = tx.send(encode_response(&response)).await;
            });
        };

        while let Some(joined) = tasks.join_next().await {
            log_join_result(joined);
        }
        drop(tx);

        let written = writer_task
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        if let Err(e) = &read_result {
            warn!(requests = received, error = %e, "reading requests failed, server stopping");
        } else {
            info!(requests = received, "input closed, server stopping");
        }
        read_result?;
        written?;
        Ok(())
    }

    /// Serve requests on stdin/stdout.
    ///
    /// # Errors
    /// Returns `ServerError::Io` if stdin or stdout fails
    pub async fn run_stdio(self: Arc<Self>) -> ServerResult<()> {
        info!(
            max_concurrent_requests = self.config.max_concurrent_requests,
            request_timeout_secs = self.config.request_timeout_secs,
            "serving requests on stdio"
        );
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }
}
