//! Mirrored remote objects, stored in an arena keyed by remote pointer.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use mchi_frame::ByteReader;
use tracing::trace;

use crate::control::JorControl;
use crate::error::Result;
use crate::message::NODE_FLAG_HAS_FLAG2;

/// Remote address of a node. Doubles as its identity on the wire.
pub type NodePtr = u32;

/// Pointer carried by the synthetic root until the target names it.
pub const UNSET_NODE_PTR: NodePtr = 0xFFFF_FFFF;

/// Handle to a node in a [`NodeTree`].
///
/// Handles are generation-checked: one kept past its node's removal resolves
/// to nothing instead of whatever later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Fetch state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    /// Children and controls unknown; needs a `GenObjectInfo` request.
    #[default]
    Invalid,
    /// Request sent, reply pending.
    GenRequestSent,
    /// Children and controls match the last reply.
    Valid,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Invalid => "invalid",
            NodeStatus::GenRequestSent => "requested",
            NodeStatus::Valid => "valid",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, pointer and flags as they precede every node on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub name: String,
    pub ptr: NodePtr,
    pub flag1: u32,
    pub flag2: u32,
}

impl NodeHeader {
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let name = r.read_sjis()?;
        let ptr = r.read_u32()?;
        let flag1 = r.read_u32()?;
        let flag2 = if flag1 & NODE_FLAG_HAS_FLAG2 != 0 {
            r.read_u32()?
        } else {
            0
        };
        trace!(name = %name, ptr = format_args!("{ptr:#010x}"), "<- node header");
        Ok(Self {
            name,
            ptr,
            flag1,
            flag2,
        })
    }
}

/// A mirrored remote object.
#[derive(Debug, Clone)]
pub struct JorNode {
    ptr: NodePtr,
    name: String,
    flag1: u32,
    flag2: u32,
    status: NodeStatus,
    last_request: Option<Instant>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    controls: Vec<JorControl>,
}

impl JorNode {
    fn new(ptr: NodePtr) -> Self {
        Self {
            ptr,
            name: String::new(),
            flag1: 0,
            flag2: 0,
            status: NodeStatus::Invalid,
            last_request: None,
            parent: None,
            children: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn ptr(&self) -> NodePtr {
        self.ptr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flag1(&self) -> u32 {
        self.flag1
    }

    pub fn flag2(&self) -> u32 {
        self.flag2
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// When the last `GenObjectInfo` request for this node went out.
    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn controls(&self) -> &[JorControl] {
        &self.controls
    }

    pub fn control(&self, id: u32) -> Option<&JorControl> {
        self.controls.iter().find(|c| c.id == id)
    }

    pub(crate) fn control_mut(&mut self, id: u32) -> Option<&mut JorControl> {
        self.controls.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn controls_mut(&mut self) -> &mut Vec<JorControl> {
        &mut self.controls
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    pub(crate) fn mark_requested(&mut self, now: Instant) {
        self.status = NodeStatus::GenRequestSent;
        self.last_request = Some(now);
    }
}

struct Slot {
    generation: u32,
    node: Option<JorNode>,
}

/// Arena holding one session's object tree.
///
/// The root is synthetic: it starts with [`UNSET_NODE_PTR`] and `Valid`
/// status, and takes on the target's root pointer once identified. Every
/// other node is owned by exactly one parent and freed with it.
pub struct NodeTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_ptr: HashMap<NodePtr, NodeId>,
    root: NodeId,
}

impl NodeTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_ptr: HashMap::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        };
        let mut root = JorNode::new(UNSET_NODE_PTR);
        root.status = NodeStatus::Valid;
        tree.root = tree.alloc(root);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&JorNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut JorNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Look a node up by its remote pointer.
    pub fn get_by_ptr(&self, ptr: NodePtr) -> Option<NodeId> {
        if ptr == UNSET_NODE_PTR {
            return None;
        }
        self.by_ptr.get(&ptr).copied()
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-order walk from the root.
    pub fn depth_first(&self) -> Vec<NodeId> {
        self.depth_first_from(self.root)
    }

    pub fn depth_first_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }

    /// Depth of a node below the root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.get(id).and_then(|n| n.parent);
        while let Some(p) = cur {
            depth += 1;
            cur = self.get(p).and_then(|n| n.parent);
        }
        depth
    }

    /// Resolve a pointer, creating a detached `Invalid` node if unknown.
    ///
    /// Returns the id and whether it was created.
    pub(crate) fn find_or_create(&mut self, ptr: NodePtr) -> (NodeId, bool) {
        if let Some(id) = self.get_by_ptr(ptr) {
            return (id, false);
        }
        let id = self.alloc(JorNode::new(ptr));
        if ptr != UNSET_NODE_PTR {
            self.by_ptr.insert(ptr, id);
        }
        (id, true)
    }

    /// Copy a wire header onto a node. An empty name leaves name and flags
    /// untouched; the pointer is always taken.
    pub(crate) fn apply_header(&mut self, id: NodeId, header: &NodeHeader) {
        if let Some(node) = self.get_mut(id) {
            if !header.name.is_empty() {
                node.name.clone_from(&header.name);
                node.flag1 = header.flag1;
                node.flag2 = header.flag2;
            }
        }
        self.set_ptr(id, header.ptr);
    }

    fn set_ptr(&mut self, id: NodeId, ptr: NodePtr) {
        let Some(node) = self.get_mut(id) else { return };
        let old = std::mem::replace(&mut node.ptr, ptr);
        if old == ptr {
            return;
        }
        if self.by_ptr.get(&old) == Some(&id) {
            self.by_ptr.remove(&old);
        }
        if ptr != UNSET_NODE_PTR {
            if let Some(prev) = self.by_ptr.insert(ptr, id) {
                trace!(ptr = format_args!("{ptr:#010x}"), ?prev, "pointer moved to another node");
            }
        }
    }

    /// Make `child` the last child of `parent`, detaching it from any
    /// previous parent. Refuses to create a cycle.
    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.get(parent).is_none() || self.get(child).is_none() || child == self.root {
            return false;
        }
        let mut cur = Some(parent);
        while let Some(p) = cur {
            if p == child {
                return false;
            }
            cur = self.get(p).and_then(|n| n.parent);
        }

        self.detach(child);
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
        true
    }

    fn detach(&mut self, child: NodeId) {
        let Some(old) = self.get_mut(child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.get_mut(old) {
            parent.children.retain(|&c| c != child);
        }
    }

    /// Drop a node's controls and children and mark it `Invalid`.
    ///
    /// Children are freed outright; they get re-declared by the next reply.
    pub fn invalidate(&mut self, id: NodeId) {
        let children = match self.get_mut(id) {
            Some(node) => {
                node.status = NodeStatus::Invalid;
                node.controls.clear();
                std::mem::take(&mut node.children)
            }
            None => return,
        };
        for child in children {
            if let Some(node) = self.get_mut(child) {
                node.parent = None;
            }
            self.remove_subtree(child);
        }
    }

    /// Free a node and everything below it.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.take(cur) else { continue };
            stack.extend(node.children);
            if self.by_ptr.get(&node.ptr) == Some(&cur) {
                self.by_ptr.remove(&node.ptr);
            }
        }
    }

    fn alloc(&mut self, node: JorNode) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn take(&mut self, id: NodeId) -> Option<JorNode> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTree")
            .field("root", &self.root)
            .field("nodes", &self.len())
            .finish()
    }
}
