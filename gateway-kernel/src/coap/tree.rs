//! Resource tree: path segments to leaf handlers.

use super::message::ResponseType;
use crate::resource::ResourcePath;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Result of handling one request, independent of the wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub code: ResponseType,
    pub payload: Vec<u8>,
}

impl Outcome {
    pub fn new(code: ResponseType) -> Self {
        Self {
            code,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(code: ResponseType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }
}

pub trait GetHandler: Send + Sync {
    fn get(&self) -> Outcome;
}

pub trait PutHandler: Send + Sync {
    fn put(&self, payload: &[u8]) -> Outcome;
}

/// A readable resource whose state changes are pushed to its watchers.
pub trait ObservableHandler: GetHandler {
    fn observers(&self) -> &Observers;
}

#[derive(Clone)]
pub enum ResourceHandler {
    Get(Arc<dyn GetHandler>),
    Put(Arc<dyn PutHandler>),
    Observable(Arc<dyn ObservableHandler>),
}

impl ResourceHandler {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceHandler::Get(_) => "get",
            ResourceHandler::Put(_) => "put",
            ResourceHandler::Observable(_) => "observable",
        }
    }
}

/// A state change destined for one watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub peer: SocketAddr,
    pub token: Vec<u8>,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Watcher {
    peer: SocketAddr,
    token: Vec<u8>,
}

/// Watchers of one observable resource and the sink notifications go to.
#[derive(Default)]
pub struct Observers {
    watchers: Mutex<Vec<Watcher>>,
    sequence: AtomicU32,
    sink: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl Observers {
    /// Register `peer`/`token`, replacing an earlier registration from the same
    /// peer and token. Returns the current sequence number.
    pub fn register(&self, peer: SocketAddr, token: &[u8]) -> u32 {
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !(w.peer == peer && w.token == token));
        watchers.push(Watcher {
            peer,
            token: token.to_vec(),
        });
        debug!(%peer, watchers = watchers.len(), "observer registered");
        self.sequence()
    }

    pub fn deregister(&self, peer: SocketAddr, token: &[u8]) -> bool {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|w| !(w.peer == peer && w.token == token));
        before != watchers.len()
    }

    pub fn count(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn attach(&self, sink: mpsc::UnboundedSender<Notification>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn detach(&self) {
        self.sink.lock().take();
    }

    /// Bump the sequence number and queue `payload` for every watcher.
    /// Returns how many notifications were queued.
    pub fn notify(&self, payload: &[u8]) -> usize {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1) & 0x00FF_FFFF;
        let watchers = self.watchers.lock().clone();
        let Some(tx) = self.sink.lock().clone() else {
            return 0;
        };

        let mut sent = 0;
        for watcher in watchers {
            let note = Notification {
                peer: watcher.peer,
                token: watcher.token,
                sequence,
                payload: payload.to_vec(),
            };
            if tx.send(note).is_err() {
                debug!("notification sink closed");
                self.detach();
                break;
            }
            sent += 1;
        }
        sent
    }
}

#[derive(Default)]
struct Node {
    handler: Option<ResourceHandler>,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn collect(&self, prefix: &ResourcePath, out: &mut Vec<(ResourcePath, ResourceHandler)>) {
        if let Some(handler) = &self.handler {
            out.push((prefix.clone(), handler.clone()));
        }
        for (name, child) in &self.children {
            child.collect(&prefix.child(name.as_str()), out);
        }
    }

    fn count(&self) -> usize {
        1 + self.children.values().map(Node::count).sum::<usize>()
    }
}

/// N-ary tree of resources under a single root.
#[derive(Default)]
pub struct ResourceTree {
    root: RwLock<Node>,
}

impl ResourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` at the end of `path`, creating missing intermediate
    /// nodes. Existing nodes are reused; re-adding replaces the handler.
    pub fn add_resource(&self, path: &ResourcePath, handler: ResourceHandler) -> bool {
        if path.is_empty() {
            return false;
        }
        let mut root = self.root.write();
        let mut node = &mut *root;
        for segment in path.segments() {
            node = node.children.entry(segment.clone()).or_default();
        }
        let kind = handler.kind();
        if node.handler.replace(handler).is_some() {
            info!(%path, kind, "replaced resource handler");
        } else {
            info!(%path, kind, "added resource");
        }
        true
    }

    pub fn lookup(&self, path: &ResourcePath) -> Option<ResourceHandler> {
        let root = self.root.read();
        let mut node = &*root;
        for segment in path.segments() {
            node = node.children.get(segment)?;
        }
        node.handler.clone()
    }

    /// Number of direct children under `path`, `None` if the node is missing.
    pub fn child_count(&self, path: &ResourcePath) -> Option<usize> {
        let root = self.root.read();
        let mut node = &*root;
        for segment in path.segments() {
            node = node.children.get(segment)?;
        }
        Some(node.children.len())
    }

    /// Total nodes including the root.
    pub fn node_count(&self) -> usize {
        self.root.read().count()
    }

    pub fn resources(&self) -> Vec<(ResourcePath, ResourceHandler)> {
        let mut out = Vec::new();
        self.root.read().collect(&ResourcePath::default(), &mut out);
        out
    }

    pub fn resource_paths(&self) -> Vec<ResourcePath> {
        self.resources().into_iter().map(|(path, _)| path).collect()
    }

    pub fn observables(&self) -> Vec<Arc<dyn ObservableHandler>> {
        self.resources()
            .into_iter()
            .filter_map(|(_, handler)| match handler {
                ResourceHandler::Observable(h) => Some(h),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl GetHandler for Fixed {
        fn get(&self) -> Outcome {
            Outcome::with_payload(ResponseType::Content, self.0)
        }
    }

    fn get(text: &'static str) -> ResourceHandler {
        ResourceHandler::Get(Arc::new(Fixed(text)))
    }

    fn path(s: &str) -> ResourcePath {
        ResourcePath::from(s)
    }

    fn payload(handler: ResourceHandler) -> Vec<u8> {
        match handler {
            ResourceHandler::Get(h) => h.get().payload,
            _ => panic!("expected a GET handler"),
        }
    }

    #[test]
    fn test_shared_prefix_is_reused() {
        let tree = ResourceTree::new();
        assert!(tree.add_resource(&path("PIOT/ConstrainedDevice/SensorMsg"), get("s")));
        assert!(tree.add_resource(&path("PIOT/ConstrainedDevice/ActuatorCmd"), get("a")));
        assert!(tree.add_resource(&path("PIOT/GatewayDevice/MgmtStatusMsg"), get("g")));

        assert_eq!(tree.child_count(&path("")), Some(1));
        assert_eq!(tree.child_count(&path("PIOT")), Some(2));
        assert_eq!(tree.child_count(&path("PIOT/ConstrainedDevice")), Some(2));
        // root + PIOT + 2 devices + 3 leaves
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.resource_paths().len(), 3);
    }

    #[test]
    fn test_re_adding_replaces_handler_only() {
        let tree = ResourceTree::new();
        tree.add_resource(&path("PIOT/ConstrainedDevice/SensorMsg"), get("old"));
        tree.add_resource(&path("PIOT/ConstrainedDevice/SensorMsg"), get("new"));
        assert_eq!(tree.node_count(), 4);
        let handler = tree.lookup(&path("PIOT/ConstrainedDevice/SensorMsg")).unwrap();
        assert_eq!(payload(handler), b"new");
    }

    #[test]
    fn test_intermediate_nodes_have_no_handler() {
        let tree = ResourceTree::new();
        tree.add_resource(&path("PIOT/ConstrainedDevice/SensorMsg"), get("s"));
        assert!(tree.lookup(&path("PIOT/ConstrainedDevice")).is_none());
        assert!(tree.lookup(&path("PIOT/Missing/SensorMsg")).is_none());
        assert!(!tree.add_resource(&path(""), get("root")));
    }

    #[test]
    fn test_observers_notify_attached_sink() {
        let observers = Observers::default();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(observers.notify(b"x"), 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        observers.attach(tx);
        observers.register(peer, b"t1");
        observers.register(peer, b"t1");
        assert_eq!(observers.count(), 1);

        assert_eq!(observers.notify(b"on"), 1);
        let note = rx.try_recv().unwrap();
        assert_eq!(note.token, b"t1");
        assert_eq!(note.sequence, 2);
        assert_eq!(note.payload, b"on");

        assert!(observers.deregister(peer, b"t1"));
        assert_eq!(observers.notify(b"off"), 0);
    }
}
