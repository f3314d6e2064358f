// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a canned-response kube client and an in-memory cluster.

use crate::cluster::{ClusterApi, WatchEvent};
use crate::error::{QuotaKeeperError, Result};
use crate::types::{ManagedObject, ObjectId, ObservedObject, ObservedState};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for PATCH (server-side apply) requests matching the exact path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        self.responses
            .lock()
            .unwrap()
            .get(&(method.to_string(), path.to_string()))
            .cloned()
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let (status, body) = self
            .find_response(&method, &path)
            .unwrap_or_else(|| (404, not_found_json("object", &path)));

        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": "test-uid",
            "resourceVersion": "1"
        }
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// What an injected failure looks like to the caller
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    Transient,
    Conflict,
}

/// In-memory cluster with versioned objects and fault injection.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectId, ObservedObject>>,
    next_version: AtomicU64,
    failing_applies: AtomicU32,
    fault: Mutex<Option<Fault>>,
    failing_observes: AtomicU32,
    applied: Mutex<Vec<ObjectId>>,
    deleted: Mutex<Vec<ObjectId>>,
    in_flight: Mutex<HashMap<String, u32>>,
    max_in_flight: AtomicU32,
    watch_scripts: Mutex<VecDeque<Vec<Result<WatchEvent>>>>,
    apply_delay: Mutex<Option<Duration>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            next_version: AtomicU64::new(1),
            ..Default::default()
        }
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Seed a live object as if something had created it out of band
    pub fn insert(&self, object: ManagedObject) -> ObservedObject {
        let observed = ObservedObject::new(object, self.bump().to_string());
        self.objects
            .lock()
            .unwrap()
            .insert(observed.object.id(), observed.clone());
        observed
    }

    /// Seed an object that predates its tenant and must survive teardown
    pub fn insert_adopted(&self, object: ManagedObject) -> ObservedObject {
        let observed = ObservedObject::new(object, self.bump().to_string()).adopted();
        self.objects
            .lock()
            .unwrap()
            .insert(observed.object.id(), observed.clone());
        observed
    }

    pub fn get(&self, id: &ObjectId) -> Option<ObservedObject> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &ObjectId) {
        self.objects.lock().unwrap().remove(id);
    }

    /// Fail the next `count` applies with the given fault
    pub fn fail_applies(&self, count: u32, fault: Fault) {
        *self.fault.lock().unwrap() = Some(fault);
        self.failing_applies.store(count, Ordering::SeqCst);
    }

    pub fn fail_observes(&self, count: u32) {
        self.failing_observes.store(count, Ordering::SeqCst);
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock().unwrap() = Some(delay);
    }

    /// Queue the events the next `watch()` call will yield before ending
    pub fn script_watch(&self, events: Vec<Result<WatchEvent>>) {
        self.watch_scripts.lock().unwrap().push_back(events);
    }

    pub fn applied(&self) -> Vec<ObjectId> {
        self.applied.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<ObjectId> {
        self.deleted.lock().unwrap().clone()
    }

    /// Highest number of concurrent mutations ever seen against one namespace
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_fault(&self) -> Option<Fault> {
        let remaining = self.failing_applies.load(Ordering::SeqCst);
        if remaining == 0 {
            return None;
        }
        self.failing_applies.store(remaining - 1, Ordering::SeqCst);
        *self.fault.lock().unwrap()
    }

    async fn enter(&self, namespace: &str) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(namespace.to_string()).or_insert(0);
            *count += 1;
            self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
        }
        let delay = *self.apply_delay.lock().unwrap();
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn leave(&self, namespace: &str) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(namespace) {
            *count -= 1;
        }
    }

    fn check_token(&self, id: &ObjectId, token: Option<&str>) -> Result<()> {
        let objects = self.objects.lock().unwrap();
        match (objects.get(id), token) {
            (Some(live), Some(t)) if live.token != t => Err(QuotaKeeperError::Conflict(id.clone())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn observe(&self, namespace: &str) -> Result<ObservedState> {
        let remaining = self.failing_observes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_observes.store(remaining - 1, Ordering::SeqCst);
            return Err(QuotaKeeperError::TransientCluster("observe unavailable".to_string()));
        }

        let objects = self.objects.lock().unwrap();
        if !objects.contains_key(&ObjectId::namespace(namespace)) {
            return Ok(ObservedState::empty(namespace, Utc::now()));
        }
        let in_namespace: Vec<ObservedObject> = objects
            .values()
            .filter(|o| o.object.id().namespace == namespace)
            .cloned()
            .collect();
        Ok(ObservedState::new(namespace, in_namespace, Utc::now()))
    }

    async fn list_managed(&self) -> Result<Vec<ObservedObject>> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>> {
        match self.watch_scripts.lock().unwrap().pop_front() {
            Some(events) => stream::iter(events).boxed(),
            None => stream::pending().boxed(),
        }
    }

    async fn apply(&self, object: &ManagedObject, token: Option<&str>) -> Result<()> {
        let id = object.id();
        self.enter(&id.namespace).await;

        let result = match self.take_fault() {
            Some(Fault::Transient) => Err(QuotaKeeperError::TransientCluster(format!(
                "{} unavailable",
                id
            ))),
            Some(Fault::Conflict) => Err(QuotaKeeperError::Conflict(id.clone())),
            None => self.check_token(&id, token).map(|_| {
                let observed = ObservedObject::new(object.clone(), self.bump().to_string());
                self.objects.lock().unwrap().insert(id.clone(), observed);
                self.applied.lock().unwrap().push(id.clone());
            }),
        };

        self.leave(&id.namespace);
        result
    }

    async fn delete(&self, id: &ObjectId, token: Option<&str>) -> Result<()> {
        self.enter(&id.namespace).await;
        let result = self.check_token(id, token).map(|_| {
            self.objects.lock().unwrap().remove(id);
            self.deleted.lock().unwrap().push(id.clone());
        });
        self.leave(&id.namespace);
        result
    }
}
