//! # Streaming module tree
//!
//! Every processing module in the pipeline (source, channel, sink) is a
//! node in a dynamic tree held by a [`StreamGraph`]. TS packets flow from a
//! parent to its children in insertion order; PID subscriptions flow the
//! other way, from leaf consumers toward the source, as reference-counted
//! joins so that one packet source can serve any number of concurrent
//! consumers without tracking who wants what.
//!
//! Nodes are addressed by copyable [`NodeId`] handles into an internal
//! arena; parents hold non-owning child handles and children a non-owning
//! back-reference, so detaching never invalidates an ongoing fan-out.
//!
//! A node's behavior is a small capability record:
//!
//! - an optional packet sink ([`TsSink`]) — nodes without one cannot be
//!   attached as children;
//! - two optional demux hooks invoked when a child's first join or last
//!   leave for a PID reaches this node. The defaults forward the request
//!   into the node's own subscription set (and from there on up); a module
//!   that answers PID requests itself, like the channel, clears them.
//!
//! ## Example
//!
//! ```rust
//! use tspipe::stream::{StreamGraph, NodeId, TsSink};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! struct Printer;
//! impl TsSink for Printer {
//!     fn on_ts(&mut self, _graph: &mut StreamGraph, _node: NodeId, ts: &[u8]) {
//!         println!("packet on pid {}", tspipe::ts::packet::get_pid(ts));
//!     }
//! }
//!
//! let mut graph = StreamGraph::new();
//! let source = graph.add_node(None);
//! let printer = graph.add_node(Some(Rc::new(RefCell::new(Printer))));
//! graph.attach(Some(source), printer);
//! graph.join(printer, 0x100);
//! assert!(graph.check(source, 0x100));
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use log::error;

use crate::ts::types::TS_MAX_PIDS;

/// Packet sink callback implemented by every module that can be attached
/// as a child. Runs on the main loop and must not block.
pub trait TsSink {
    /// Handles one 188-byte TS packet delivered by the parent's fan-out.
    ///
    /// The implementation may inspect and forward the packet (via
    /// [`StreamGraph::send`] on its own node) and may change its own PID
    /// subscriptions; it must not mutate the children list of the node
    /// currently fanning out.
    fn on_ts(&mut self, graph: &mut StreamGraph, node: NodeId, ts: &[u8]);
}

/// Shared handle to a node's packet sink.
pub type SinkRef = Rc<RefCell<dyn TsSink>>;

/// A demux hook: called with the hook owner's node id and the PID a child
/// started (join) or stopped (leave) wanting.
pub type DemuxHook = Rc<RefCell<dyn FnMut(&mut StreamGraph, NodeId, u16)>>;

/// Handle to a node in a [`StreamGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    sink: Option<SinkRef>,
    join_hook: Option<DemuxHook>,
    leave_hook: Option<DemuxHook>,
    pid_refs: Box<[u16]>,
}

/// Arena of stream nodes plus the tree and subscription operations over
/// them. Single-threaded by design; all calls happen on the main loop.
#[derive(Default)]
pub struct StreamGraph {
    nodes: Vec<Option<Node>>,
}

fn forward_join_hook() -> DemuxHook {
    Rc::new(RefCell::new(|graph: &mut StreamGraph, node: NodeId, pid: u16| {
        graph.join(node, pid)
    }))
}

fn forward_leave_hook() -> DemuxHook {
    Rc::new(RefCell::new(|graph: &mut StreamGraph, node: NodeId, pid: u16| {
        graph.leave(node, pid)
    }))
}

impl StreamGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node with no parent, no children, zeroed subscriptions and
    /// the default forwarding demux hooks. A node created without a sink
    /// can only serve as a root producer.
    pub fn add_node(&mut self, sink: Option<SinkRef>) -> NodeId {
        let node = Node {
            parent: None,
            children: Vec::new(),
            sink,
            join_hook: Some(forward_join_hook()),
            leave_hook: Some(forward_leave_hook()),
            pid_refs: vec![0; TS_MAX_PIDS].into_boxed_slice(),
        };
        match self.nodes.iter().position(|slot| slot.is_none()) {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Installs or clears a node's packet sink.
    ///
    /// Used by modules that insert themselves into the graph before their
    /// sink object exists; the sink must be in place before the node is
    /// attached under a parent.
    pub fn set_sink(&mut self, node: NodeId, sink: Option<SinkRef>) {
        self.node_mut(node).sink = sink;
    }

    /// Replaces a node's demux hooks. `None` silently consumes child PID
    /// requests instead of forwarding them upward.
    pub fn set_demux_hooks(
        &mut self,
        node: NodeId,
        join: Option<DemuxHook>,
        leave: Option<DemuxHook>,
    ) {
        let n = self.node_mut(node);
        n.join_hook = join;
        n.leave_hook = leave;
    }

    /// Moves `child` under `parent` (or detaches it when `parent` is
    /// `None`), preserving its subscriptions.
    ///
    /// The child's PID memberships are snapshot and drained first, so the
    /// old upstream chain sees the corresponding leaves; after re-linking
    /// they are replayed against the new chain. Attaching a node without a
    /// sink, or under a destroyed parent, is a contract violation.
    pub fn attach(&mut self, parent: Option<NodeId>, child: NodeId) {
        // save pid membership, leave all pids
        let mut saved = vec![0u16; TS_MAX_PIDS];
        for pid in 0..TS_MAX_PIDS as u16 {
            while self.check(child, pid) {
                self.leave(child, pid);
                saved[pid as usize] += 1;
            }
        }

        // switch parents
        if let Some(old_parent) = self.node(child).parent {
            self.node_mut(old_parent).children.retain(|&c| c != child);
            self.node_mut(child).parent = None;
        }

        if let Some(parent) = parent {
            assert!(
                self.nodes.get(parent.0).is_some_and(|slot| slot.is_some()),
                "attaching to uninitialized module"
            );
            assert!(self.node(child).sink.is_some(), "this module cannot receive TS");

            self.node_mut(child).parent = Some(parent);
            self.node_mut(parent).children.push(child);
        }

        // re-request pids from the new parent
        for pid in 0..TS_MAX_PIDS as u16 {
            for _ in 0..saved[pid as usize] {
                self.join(child, pid);
            }
        }
    }

    /// Adds one reference to `pid` at `node`; on the 0→1 transition the
    /// parent's join hook is dispatched.
    pub fn join(&mut self, node: NodeId, pid: u16) {
        assert!((pid as usize) < TS_MAX_PIDS, "join: pid {} out of range", pid);

        let n = self.node_mut(node);
        n.pid_refs[pid as usize] += 1;
        if n.pid_refs[pid as usize] == 1 {
            if let Some(parent) = n.parent {
                if let Some(hook) = self.node(parent).join_hook.clone() {
                    (&mut *hook.borrow_mut())(self, parent, pid);
                }
            }
        }
    }

    /// Drops one reference to `pid` at `node`; on the 1→0 transition the
    /// parent's leave hook is dispatched. Leaving a PID with no references
    /// is logged and ignored.
    pub fn leave(&mut self, node: NodeId, pid: u16) {
        assert!((pid as usize) < TS_MAX_PIDS, "leave: pid {} out of range", pid);

        let n = self.node_mut(node);
        if n.pid_refs[pid as usize] == 0 {
            error!("[stream {}] double leave on pid {}", node.0, pid);
            return;
        }
        n.pid_refs[pid as usize] -= 1;
        if n.pid_refs[pid as usize] == 0 {
            if let Some(parent) = n.parent {
                if let Some(hook) = self.node(parent).leave_hook.clone() {
                    (&mut *hook.borrow_mut())(self, parent, pid);
                }
            }
        }
    }

    /// Returns whether `node` currently holds any reference to `pid`.
    pub fn check(&self, node: NodeId, pid: u16) -> bool {
        assert!((pid as usize) < TS_MAX_PIDS, "check: pid {} out of range", pid);
        self.node(node).pid_refs[pid as usize] > 0
    }

    /// Delivers one TS packet to every child of `node`, in insertion order.
    ///
    /// Children may adjust their subscriptions from inside `on_ts`; the
    /// children list of `node` itself must not change during the fan-out.
    pub fn send(&mut self, node: NodeId, ts: &[u8]) {
        let mut index = 0;
        loop {
            let child = match self.node(node).children.get(index) {
                Some(&child) => child,
                None => break,
            };
            index += 1;

            if let Some(sink) = self.node(child).sink.clone() {
                sink.borrow_mut().on_ts(self, child, ts);
            }
        }
    }

    /// Tears a node down: drains all of its PID references (propagating
    /// leaves upstream), detaches it, orphans its children (they become
    /// detached roots) and frees the arena slot.
    pub fn destroy(&mut self, node: NodeId) {
        // leave all joined pids
        for pid in 0..TS_MAX_PIDS as u16 {
            while self.check(node, pid) {
                self.leave(node, pid);
            }
        }

        // detach from upstream
        self.attach(None, node);

        // detach children
        let children = std::mem::take(&mut self.node_mut(node).children);
        for child in children {
            self.node_mut(child).parent = None;
        }

        self.nodes[node.0] = None;
    }

    /// Returns the parent of `node`, if attached.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("stream node destroyed")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stream node destroyed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    struct Recorder {
        label: u8,
        log: Rc<RefCell<Vec<(u8, Vec<u8>)>>>,
    }

    impl TsSink for Recorder {
        fn on_ts(&mut self, _graph: &mut StreamGraph, _node: NodeId, ts: &[u8]) {
            self.log.borrow_mut().push((self.label, ts.to_vec()));
        }
    }

    fn recorder(
        graph: &mut StreamGraph,
        label: u8,
        log: &Rc<RefCell<Vec<(u8, Vec<u8>)>>>,
    ) -> NodeId {
        graph.add_node(Some(Rc::new(RefCell::new(Recorder { label, log: log.clone() }))))
    }

    fn spy_hook(log: Rc<RefCell<Vec<(&'static str, u16)>>>, op: &'static str) -> DemuxHook {
        Rc::new(RefCell::new(move |_graph: &mut StreamGraph, _node: NodeId, pid: u16| {
            log.borrow_mut().push((op, pid));
        }))
    }

    #[test]
    fn join_propagates_to_parent_once() {
        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = graph.add_node(None);
        let child = recorder(&mut graph, 0, &log);
        graph.attach(Some(parent), child);

        graph.join(child, 0x100);
        graph.join(child, 0x100);
        assert!(graph.check(parent, 0x100));

        graph.leave(child, 0x100);
        assert!(graph.check(parent, 0x100), "parent keeps pid while child still holds it");
        graph.leave(child, 0x100);
        assert!(!graph.check(parent, 0x100));
        assert!(!graph.check(child, 0x100));
    }

    #[test]
    fn check_mirrors_refcount() {
        let mut graph = StreamGraph::new();
        let node = graph.add_node(None);
        assert!(!graph.check(node, 42));
        graph.join(node, 42);
        assert!(graph.check(node, 42));
        graph.leave(node, 42);
        assert!(!graph.check(node, 42));
    }

    #[test]
    fn double_leave_is_ignored() {
        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = graph.add_node(None);
        let spy = Rc::new(RefCell::new(Vec::new()));
        graph.set_demux_hooks(
            parent,
            Some(spy_hook(spy.clone(), "join")),
            Some(spy_hook(spy.clone(), "leave")),
        );
        let child = recorder(&mut graph, 0, &log);
        graph.attach(Some(parent), child);

        graph.leave(child, 0x200);
        assert!(spy.borrow().is_empty(), "no call reaches the parent");
        assert!(!graph.check(child, 0x200));
    }

    #[test]
    fn attach_drains_old_parent_and_replays_on_new() {
        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let old_parent = graph.add_node(None);
        let new_parent = graph.add_node(None);
        let old_spy = Rc::new(RefCell::new(Vec::new()));
        let new_spy = Rc::new(RefCell::new(Vec::new()));
        graph.set_demux_hooks(
            old_parent,
            Some(spy_hook(old_spy.clone(), "join")),
            Some(spy_hook(old_spy.clone(), "leave")),
        );
        graph.set_demux_hooks(
            new_parent,
            Some(spy_hook(new_spy.clone(), "join")),
            Some(spy_hook(new_spy.clone(), "leave")),
        );

        let child = recorder(&mut graph, 0, &log);
        graph.attach(Some(old_parent), child);
        graph.join(child, 0x101);
        graph.join(child, 0x101);
        graph.join(child, 0x102);
        old_spy.borrow_mut().clear();

        graph.attach(Some(new_parent), child);

        // the old chain saw each membership go away, the new one saw it
        // arrive; per-unit refcounts above one stay local to the child
        assert_eq!(*old_spy.borrow(), vec![("leave", 0x101), ("leave", 0x102)]);
        assert_eq!(*new_spy.borrow(), vec![("join", 0x101), ("join", 0x102)]);
        assert_eq!(graph.parent(child), Some(new_parent));

        // the child's own counts survived the move
        graph.leave(child, 0x101);
        assert!(graph.check(child, 0x101));
        graph.leave(child, 0x101);
        assert!(!graph.check(child, 0x101));
    }

    #[test]
    #[should_panic(expected = "cannot receive TS")]
    fn attach_rejects_sinkless_child() {
        let mut graph = StreamGraph::new();
        let parent = graph.add_node(None);
        let child = graph.add_node(None);
        graph.attach(Some(parent), child);
    }

    #[test]
    fn fanout_in_insertion_order() {
        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = graph.add_node(None);
        for label in 1..=3 {
            let child = recorder(&mut graph, label, &log);
            graph.attach(Some(root), child);
        }

        let ts = vec![0x47u8; 188];
        graph.send(root, &ts);

        let order: Vec<u8> = log.borrow().iter().map(|(label, _)| *label).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(log.borrow().iter().all(|(_, pkt)| pkt.len() == 188));
    }

    #[test]
    fn fanout_reaches_grandchildren() {
        struct Relay;
        impl TsSink for Relay {
            fn on_ts(&mut self, graph: &mut StreamGraph, node: NodeId, ts: &[u8]) {
                graph.send(node, ts);
            }
        }

        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = graph.add_node(None);
        let relay = graph.add_node(Some(Rc::new(RefCell::new(Relay))));
        graph.attach(Some(root), relay);
        let leaf = recorder(&mut graph, 9, &log);
        graph.attach(Some(relay), leaf);

        graph.send(root, &[0x47u8; 188]);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn subscriptions_may_change_inside_on_ts() {
        struct Joiner;
        impl TsSink for Joiner {
            fn on_ts(&mut self, graph: &mut StreamGraph, node: NodeId, _ts: &[u8]) {
                if !graph.check(node, 0x300) {
                    graph.join(node, 0x300);
                }
            }
        }

        let mut graph = StreamGraph::new();
        let root = graph.add_node(None);
        let joiner = graph.add_node(Some(Rc::new(RefCell::new(Joiner))));
        graph.attach(Some(root), joiner);

        graph.send(root, &[0x47u8; 188]);
        assert!(graph.check(root, 0x300), "join from inside on_ts reached the parent");
    }

    #[test]
    fn destroy_detaches_and_orphans_children() {
        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = graph.add_node(None);
        let middle = recorder(&mut graph, 1, &log);
        graph.attach(Some(root), middle);
        let leaf = recorder(&mut graph, 2, &log);
        graph.attach(Some(middle), leaf);

        graph.join(middle, 0x400);
        graph.destroy(middle);

        assert!(!graph.check(root, 0x400), "destroy released the upstream pid");
        assert_eq!(graph.parent(leaf), None);

        graph.send(root, &[0x47u8; 188]);
        assert!(log.borrow().is_empty(), "destroyed node no longer fans out");
    }

    #[quickcheck]
    fn prop_parent_balance_equals_membership(ops: Vec<(u16, bool)>) -> bool {
        let mut graph = StreamGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = graph.add_node(None);
        let child = recorder(&mut graph, 0, &log);
        graph.attach(Some(parent), child);

        for (pid, join) in ops {
            let pid = pid % TS_MAX_PIDS as u16;
            if join {
                graph.join(child, pid);
            } else {
                graph.leave(child, pid);
            }
        }

        (0..TS_MAX_PIDS as u16).all(|pid| graph.check(parent, pid) == graph.check(child, pid))
    }
}
