// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// Licensed under the MIT License. You may obtain a copy of the License at
// https://opensource.org/licenses/MIT
//
// This software is provided "AS IS", without warranty of any kind, express or
// implied, including but not limited to the warranties of merchantability,
// fitness for a particular purpose, and noninfringement. In no event shall the
// authors or copyright holders be liable for any claim, damages, or other
// liability arising from the use of this software.
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.
//
//! Vector store hosted on a dedicated thread.
//!
//! Message Protocol:
//! - Request: `{ id: number, method: string, args: any[] }`
//! - Response: `{ id: number, success: boolean, result?: any, error?: string }`
//!
//! Every request gets exactly one response. There is no streaming and no
//! cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use flutter_rust_bridge::frb;
use serde::{Serialize, Deserialize};
use serde_json::{json, Value};
use log::{info, debug, warn, error};
use crate::api::error::{RagError, Result};
use crate::api::vector_store::{SearchResult, VectorStore, VectorStoreConfig, VectorStoreStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Initialize,
    AddDocument,
    SearchSimilar,
    GetStats,
    Clear,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(id: u64, result: Value) -> Self {
        Self { id, success: true, result: Some(result), error: None }
    }

    fn err(id: u64, message: String) -> Self {
        Self { id, success: false, result: None, error: Some(message) }
    }
}

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| RagError::InvalidInput(format!("missing argument {} ({})", index, name)))
}

fn arg_str(args: &[Value], index: usize, name: &str) -> Result<String> {
    arg(args, index, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RagError::InvalidInput(format!("argument {} ({}) must be a string", index, name)))
}

fn arg_opt_str(args: &[Value], index: usize) -> Option<String> {
    args.get(index).and_then(Value::as_str).map(str::to_string)
}

fn arg_usize(args: &[Value], index: usize, name: &str) -> Result<usize> {
    arg(args, index, name)?
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| RagError::InvalidInput(format!("argument {} ({}) must be a non-negative integer", index, name)))
}

fn arg_f64(args: &[Value], index: usize, name: &str) -> Result<f64> {
    arg(args, index, name)?
        .as_f64()
        .ok_or_else(|| RagError::InvalidInput(format!("argument {} ({}) must be a number", index, name)))
}

fn arg_vector(args: &[Value], index: usize, name: &str) -> Result<Vec<f32>> {
    Ok(serde_json::from_value(arg(args, index, name)?.clone())?)
}

/// The store as seen from inside the worker.
#[derive(Default)]
pub struct WorkerState {
    store: Option<VectorStore>,
}

impl WorkerState {
    fn store(&self) -> Result<&VectorStore> {
        self.store
            .as_ref()
            .ok_or_else(|| RagError::NotInitialized("call initialize() first".to_string()))
    }

    fn dispatch(&mut self, method: Method, args: &[Value]) -> Result<Value> {
        match method {
            Method::Initialize => {
                let path = arg_str(args, 0, "databasePath")?;
                let dimension = args.get(1).and_then(Value::as_u64).map(|d| d as usize);
                if let Some(previous) = self.store.take() {
                    previous.close()?;
                }
                let store = VectorStore::new(VectorStoreConfig { dimension, ..Default::default() });
                store.initialize(&path)?;
                self.store = Some(store);
                Ok(Value::Bool(true))
            }
            Method::AddDocument => {
                let id = arg_str(args, 0, "id")?;
                let content = arg_str(args, 1, "content")?;
                let embedding = arg_vector(args, 2, "embedding")?;
                let metadata = arg_opt_str(args, 3);
                self.store()?.add_document(&id, &content, &embedding, metadata.as_deref())?;
                Ok(Value::Bool(true))
            }
            Method::SearchSimilar => {
                let query = arg_vector(args, 0, "queryEmbedding")?;
                let top_k = arg_usize(args, 1, "topK")?;
                let threshold = arg_f64(args, 2, "threshold")?;
                let results = self.store()?.search(&query, top_k, threshold)?;
                Ok(serde_json::to_value(results)?)
            }
            Method::GetStats => Ok(serde_json::to_value(self.store()?.stats()?)?),
            Method::Clear => {
                self.store()?.clear()?;
                Ok(Value::Bool(true))
            }
            Method::Close => {
                if let Some(store) = &self.store {
                    store.close()?;
                }
                Ok(Value::Bool(true))
            }
        }
    }
}

/// Execute one request against `state`. Always produces exactly one response.
pub fn handle_request(state: &mut WorkerState, request: Request) -> Response {
    debug!("[worker] #{} {:?}", request.id, request.method);
    match state.dispatch(request.method, &request.args) {
        Ok(result) => Response::ok(request.id, result),
        Err(e) => {
            error!("[worker] Error in {:?}: {}", request.method, e);
            Response::err(request.id, e.to_string())
        }
    }
}

/// Execute one JSON-encoded request, for hosts that exchange text messages.
/// Malformed or unknown requests still get a reply carrying their id.
pub fn handle_json_message(state: &mut WorkerState, message: &str) -> Response {
    let raw: Value = match serde_json::from_str(message) {
        Ok(v) => v,
        Err(e) => return Response::err(0, format!("Invalid message: {}", e)),
    };
    let id = raw.get("id").and_then(Value::as_u64).unwrap_or(0);
    match serde_json::from_value::<Request>(raw.clone()) {
        Ok(request) => handle_request(state, request),
        Err(e) => match raw.get("method").and_then(Value::as_str) {
            Some(name) if serde_json::from_value::<Method>(Value::String(name.to_string())).is_err() => {
                Response::err(id, format!("Unknown method: {}", name))
            }
            _ => Response::err(id, format!("Invalid request: {}", e)),
        },
    }
}

/// Thread that exclusively owns a [`VectorStore`].
pub struct VectorStoreWorker {
    receiver: Receiver<Request>,
    sender: Sender<Response>,
    state: WorkerState,
}

impl VectorStoreWorker {
    pub fn new(receiver: Receiver<Request>, sender: Sender<Response>) -> Self {
        Self { receiver, sender, state: WorkerState::default() }
    }

    /// Start a worker and return the client that talks to it.
    #[frb(ignore)]
    pub fn spawn() -> Result<VectorStoreClient> {
        let (request_tx, request_rx) = unbounded::<Request>();
        let (response_tx, response_rx) = unbounded::<Response>();
        let pending: Arc<Mutex<HashMap<u64, Sender<Response>>>> = Arc::new(Mutex::new(HashMap::new()));

        let worker = Self::new(request_rx, response_tx);
        let worker_handle = std::thread::Builder::new()
            .name("vector-store-worker".into())
            .spawn(move || worker.run())?;

        let router_pending = Arc::clone(&pending);
        let router_handle = std::thread::Builder::new()
            .name("vector-store-router".into())
            .spawn(move || route_responses(response_rx, router_pending))?;

        info!("[worker] Started");
        Ok(VectorStoreClient {
            requests: Some(request_tx),
            pending,
            next_id: AtomicU64::new(0),
            worker: Some(worker_handle),
            router: Some(router_handle),
        })
    }

    fn run(mut self) {
        for request in self.receiver.iter() {
            let response = handle_request(&mut self.state, request);
            if self.sender.send(response).is_err() {
                break;
            }
        }
        if let Some(store) = &self.state.store {
            if let Err(e) = store.close() {
                warn!("[worker] Failed to close store on shutdown: {}", e);
            }
        }
        info!("[worker] Stopped");
    }
}

fn lock_pending(pending: &Mutex<HashMap<u64, Sender<Response>>>) -> MutexGuard<'_, HashMap<u64, Sender<Response>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route_responses(responses: Receiver<Response>, pending: Arc<Mutex<HashMap<u64, Sender<Response>>>>) {
    for response in responses.iter() {
        let waiter = lock_pending(&pending).remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!("[worker] Response for unknown request #{}", response.id),
        }
    }
    // Dropping the senders fails every call still waiting.
    lock_pending(&pending).clear();
}

/// Caller side of the worker protocol.
///
/// Calls may be issued from several threads; each is tagged with the next
/// correlation id and resolved by the matching response.
pub struct VectorStoreClient {
    requests: Option<Sender<Request>>,
    pending: Arc<Mutex<HashMap<u64, Sender<Response>>>>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl VectorStoreClient {
    /// Send a raw request and wait for its response payload.
    pub fn call(&self, method: Method, args: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = bounded(1);
        lock_pending(&self.pending).insert(id, tx);

        let sent = match &self.requests {
            Some(requests) => requests.send(Request { id, method, args }).is_ok(),
            None => false,
        };
        if !sent {
            lock_pending(&self.pending).remove(&id);
            return Err(RagError::WorkerError("worker is not running".to_string()));
        }

        let response = rx
            .recv()
            .map_err(|_| RagError::WorkerError("worker disconnected before replying".to_string()))?;
        if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(RagError::WorkerError(response.error.unwrap_or_else(|| "unknown error".to_string())))
        }
    }

    pub fn initialize(&self, db_path: &str, dimension: Option<usize>) -> Result<()> {
        self.call(Method::Initialize, vec![json!(db_path), json!(dimension)]).map(|_| ())
    }

    pub fn add_document(&self, id: &str, content: &str, embedding: &[f32], metadata: Option<&str>) -> Result<()> {
        self.call(Method::AddDocument, vec![json!(id), json!(content), json!(embedding), json!(metadata)])
            .map(|_| ())
    }

    pub fn search_similar(&self, query_embedding: &[f32], top_k: usize, threshold: f64) -> Result<Vec<SearchResult>> {
        let value = self.call(Method::SearchSimilar, vec![json!(query_embedding), json!(top_k), json!(threshold)])?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn get_stats(&self) -> Result<VectorStoreStats> {
        Ok(serde_json::from_value(self.call(Method::GetStats, Vec::new())?)?)
    }

    pub fn clear(&self) -> Result<()> {
        self.call(Method::Clear, Vec::new()).map(|_| ())
    }

    pub fn close(&self) -> Result<()> {
        self.call(Method::Close, Vec::new()).map(|_| ())
    }

    /// Number of calls still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

impl Drop for VectorStoreClient {
    fn drop(&mut self) {
        // Closing the request channel stops the worker, which stops the router.
        self.requests.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.router.take() {
            let _ = handle.join();
        }
    }
}
