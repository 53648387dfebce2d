//! The `ORef` tag handler: keeps a mirror of the target's object tree.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mchi_frame::{ByteReader, ByteWriter, Magic, TagHandler};
use tracing::{debug, info, trace};

use crate::control::{ControlInput, JorControl, SelectorItem};
use crate::error::{JorError, Result};
use crate::message::{
    start_node_mode, EventType, MessageType, TreeCommand, INVALID_NODE_HEAD, INVALID_NODE_TAIL,
};
use crate::node::{NodeHeader, NodeId, NodePtr, NodeStatus, NodeTree, UNSET_NODE_PTR};

/// Magic of the object tree tag.
pub const OREF_MAGIC: Magic = Magic::new(*b"ORef");

/// Default time a `GenObjectInfo` request may go unanswered before it is
/// re-sent.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for [`ObjectTreeProtocol`].
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Re-request a node after this long without a reply. Default: 2 s.
    pub request_timeout: Duration,
    /// Have [`ObjectTreeProtocol::sweep`] request `Invalid` nodes as well as
    /// stalled ones. Default: true.
    pub auto_request_invalid: bool,
    /// Result sent back for remote message boxes. Default: 1 (OK).
    pub message_box_result: i32,
    /// Result sent back for remote shell-execute requests. Default: 42, which
    /// the target reads as success.
    pub shell_execute_result: i32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auto_request_invalid: true,
            message_box_result: 1,
            shell_execute_result: 42,
        }
    }
}

/// Tree changes for the presentation layer, drained each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    /// The whole tree was discarded.
    TreeReset,
    /// The target named its root object.
    RootIdentified { ptr: NodePtr },
    /// A node's children and controls were (re)populated.
    NodeValid { ptr: NodePtr },
    /// A node was invalidated and will be re-fetched.
    NodeInvalidated { ptr: NodePtr },
    /// The target pushed a new child outside a requested fetch.
    NodeDeclared { ptr: NodePtr, parent: NodePtr },
    /// A control changed through a live update.
    ControlUpdated { node: NodePtr, id: u32 },
    /// The target asked the host to show a message box. Already acknowledged.
    MessageBox {
        return_ptr: u32,
        message: String,
        title: String,
        style: u32,
    },
    /// The target asked the host to launch a program. Already acknowledged.
    ShellExecute {
        return_ptr: u32,
        file: String,
        parameters: String,
        directory: String,
        show: u32,
    },
}

/// Object tree state for one session.
///
/// Inbound tags mutate the tree and may queue outbound events; nothing is
/// written to the transport here. The session drains [`TagHandler::take_outbound`]
/// after each pump.
#[derive(Debug)]
pub struct ObjectTreeProtocol {
    config: ProtocolConfig,
    tree: NodeTree,
    outbound: Vec<Bytes>,
    events: VecDeque<TreeEvent>,
}

impl ObjectTreeProtocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            tree: NodeTree::new(),
            outbound: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Take every event recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<TreeEvent> {
        self.events.drain(..).collect()
    }

    /// Outbound payloads not yet taken by the session.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Discard the tree, leaving only the unset root.
    pub fn reset(&mut self) {
        self.tree = NodeTree::new();
        self.events.push_back(TreeEvent::TreeReset);
    }

    /// Ask the target to identify its root object.
    pub fn request_root(&mut self) {
        debug!("-> GetRootObjectRef");
        let w = begin_event(EventType::GetRootObjectRef);
        self.outbound.push(w.freeze());
    }

    /// Ask the target for a node's children and controls.
    ///
    /// Returns `false` without sending anything if the node is gone or its
    /// pointer is still unset.
    pub fn request_node_info(&mut self, id: NodeId) -> bool {
        self.request_node_info_at(id, Instant::now())
    }

    pub fn request_node_info_at(&mut self, id: NodeId, now: Instant) -> bool {
        let Some(node) = self.tree.get_mut(id) else {
            return false;
        };
        let ptr = node.ptr();
        if ptr == UNSET_NODE_PTR {
            return false;
        }
        node.mark_requested(now);

        debug!(ptr = format_args!("{ptr:#010x}"), "-> GenObjectInfo");
        let mut w = begin_event(EventType::GenObjectInfo);
        w.put_u32(ptr);
        self.outbound.push(w.freeze());
        true
    }

    /// Change a control's value and send a property event.
    ///
    /// Returns `false` when the value is unchanged; nothing is sent then.
    /// Buttons always send.
    pub fn set_value(&mut self, node: NodeId, control_id: u32, input: ControlInput) -> Result<bool> {
        let entry = self.tree.get_mut(node).ok_or(JorError::StaleNode(node))?;
        let ptr = entry.ptr();
        let control = entry
            .control_mut(control_id)
            .ok_or(JorError::ControlNotFound {
                node: ptr,
                id: control_id,
            })?;

        if !control.apply_input(input)? {
            trace!(id = control_id, "value unchanged, property event suppressed");
            return Ok(false);
        }

        let mut w = begin_event(EventType::PropertyEvent);
        control.write_property_event(ptr, &mut w)?;
        debug!(
            node = format_args!("{ptr:#010x}"),
            control = %control.type_tag,
            id = control_id,
            "-> PropertyEvent"
        );
        self.outbound.push(w.freeze());
        Ok(true)
    }

    /// Complete a remote request that is blocking on the target.
    pub fn send_ack_result(&mut self, return_ptr: u32, value: i32) {
        debug!(return_ptr = format_args!("{return_ptr:#010x}"), value, "-> ResultS32");
        let mut w = begin_event(EventType::ResultS32);
        w.put_u32(return_ptr).put_i32(value);
        self.outbound.push(w.freeze());
    }

    /// Request `Invalid` nodes and re-request stalled ones.
    ///
    /// Returns the number of requests queued.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut sent = 0;
        for id in self.tree.depth_first() {
            let Some(node) = self.tree.get(id) else {
                continue;
            };
            let due = match node.status() {
                NodeStatus::Invalid => self.config.auto_request_invalid,
                NodeStatus::GenRequestSent => node.last_request().map_or(true, |at| {
                    now.saturating_duration_since(at) > self.config.request_timeout
                }),
                NodeStatus::Valid => false,
            };
            if !due {
                continue;
            }
            if node.status() == NodeStatus::GenRequestSent {
                debug!(ptr = format_args!("{:#010x}", node.ptr()), "GenObjectInfo unanswered, retrying");
            }
            if self.request_node_info_at(id, now) {
                sent += 1;
            }
        }
        sent
    }

    /// Handle one `ORef` payload.
    pub fn process_message(&mut self, payload: &[u8], now: Instant) -> Result<()> {
        let mut r = ByteReader::new(payload);
        let code = r.read_u32()?;
        let Some(ty) = MessageType::from_code(code) else {
            debug!(code, len = payload.len(), "<- ORef unknown message type ignored");
            return Ok(());
        };
        debug!(kind = ?ty, len = payload.len(), "<- ORef");

        match ty {
            MessageType::Reset => {
                info!("target reset its object tree");
                self.reset();
                self.request_root();
                Ok(())
            }
            MessageType::GetRootObjectRef => self.handle_root_ref(&mut r, now),
            MessageType::GenObjectInfo => self.handle_object_info(&mut r),
            MessageType::InvalidNode => self.handle_invalid_node(&mut r),
            MessageType::StartNode => self.handle_start_node(&mut r),
            MessageType::StartUpdateNode => self.handle_update_node(&mut r),
            MessageType::OpenMessageBox => self.handle_message_box(&mut r),
            MessageType::ShellExecute => self.handle_shell_execute(&mut r),
            MessageType::Fio => {
                debug!("file I/O request ignored");
                Ok(())
            }
        }
    }

    fn handle_root_ref(&mut self, r: &mut ByteReader<'_>, now: Instant) -> Result<()> {
        let header = NodeHeader::read(r)?;
        let root = self.tree.root();
        self.tree.apply_header(root, &header);
        info!(name = %header.name, ptr = format_args!("{:#010x}", header.ptr), "root object identified");
        self.events
            .push_back(TreeEvent::RootIdentified { ptr: header.ptr });
        self.request_node_info_at(root, now);
        Ok(())
    }

    fn handle_object_info(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        let mut stack = Vec::new();
        let mut created = Vec::new();
        let result = self.decode_object_info(r, &mut stack, &mut created);

        // Nodes this reply created but never placed under a parent.
        let root = self.tree.root();
        for id in created {
            let orphan = id != root && self.tree.get(id).is_some_and(|n| n.parent().is_none());
            if orphan {
                self.tree.remove_subtree(id);
            }
        }

        result?;
        if !stack.is_empty() {
            return Err(JorError::UnbalancedNodeStack { depth: stack.len() });
        }
        Ok(())
    }

    /// Interpret a flat command stream with an explicit node stack.
    fn decode_object_info(
        &mut self,
        r: &mut ByteReader<'_>,
        stack: &mut Vec<NodeId>,
        created: &mut Vec<NodeId>,
    ) -> Result<()> {
        let mut selector: Option<(NodeId, usize)> = None;

        while !r.is_empty() {
            let code = r.read_u32()?;
            let command = TreeCommand::from_code(code).ok_or(JorError::UnknownCommand {
                command: code,
                context: "object info",
            })?;
            trace!(command = command.name(), depth = stack.len(), "<- ORef object info");

            match command {
                TreeCommand::StartNode => {
                    let header = NodeHeader::read(r)?;
                    let id = self.declare(&header, created);
                    self.tree.invalidate(id);
                    if let Some(&parent) = stack.last() {
                        self.tree.attach(parent, id);
                    }
                    stack.push(id);
                }
                TreeCommand::EndNode => {
                    let id = stack.pop().ok_or(JorError::UnexpectedEndNode)?;
                    if let Some(node) = self.tree.get_mut(id) {
                        node.set_status(NodeStatus::Valid);
                        let ptr = node.ptr();
                        self.events.push_back(TreeEvent::NodeValid { ptr });
                    }
                }
                TreeCommand::GenNode => {
                    let parent = *stack
                        .last()
                        .ok_or(JorError::NoCurrentNode { command: "GenNode" })?;
                    let header = NodeHeader::read(r)?;
                    let id = self.declare(&header, created);
                    if self.tree.get(id).and_then(|n| n.parent()) != Some(parent) {
                        self.tree.attach(parent, id);
                    }
                }
                TreeCommand::GenControl | TreeCommand::StartSelector => {
                    let current = *stack.last().ok_or(JorError::NoCurrentNode {
                        command: command.name(),
                    })?;
                    let control = JorControl::read(r)?;
                    let node = self
                        .tree
                        .get_mut(current)
                        .ok_or(JorError::StaleNode(current))?;
                    let controls = node.controls_mut();
                    controls.push(control);
                    if command == TreeCommand::StartSelector {
                        selector = Some((current, controls.len() - 1));
                    }
                }
                TreeCommand::EndSelector => selector = None,
                TreeCommand::SelectorItem => {
                    let item = SelectorItem::read(r)?;
                    let target = match selector {
                        Some((node, index)) => self
                            .tree
                            .get_mut(node)
                            .and_then(|n| n.controls_mut().get_mut(index)),
                        None => None,
                    };
                    if !target.is_some_and(|control| control.push_item(item)) {
                        trace!("selector item outside a selector dropped");
                    }
                }
                TreeCommand::UpdateControl => {
                    return Err(JorError::UnknownCommand {
                        command: code,
                        context: "object info",
                    })
                }
            }
        }
        Ok(())
    }

    /// Resolve or create the node a header names, and copy the header on.
    fn declare(&mut self, header: &NodeHeader, created: &mut Vec<NodeId>) -> NodeId {
        let (id, is_new) = self.tree.find_or_create(header.ptr);
        if is_new {
            created.push(id);
        }
        self.tree.apply_header(id, header);
        id
    }

    fn handle_invalid_node(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        expect_marker(r, INVALID_NODE_HEAD)?;
        let ptr = r.read_u32()?;
        match self.tree.get_by_ptr(ptr) {
            Some(id) => {
                debug!(ptr = format_args!("{ptr:#010x}"), "<- InvalidNode");
                self.tree.invalidate(id);
                self.events.push_back(TreeEvent::NodeInvalidated { ptr });
            }
            None => trace!(ptr = format_args!("{ptr:#010x}"), "InvalidNode for unknown node"),
        }
        expect_marker(r, INVALID_NODE_TAIL)
    }

    fn handle_start_node(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        let mode = r.read_u32()?;
        match mode {
            start_node_mode::START | start_node_mode::GEN => {
                let _reserved = r.read_u32()?;
                let parent_ptr = r.read_u32()?;
                let header = NodeHeader::read(r)?;
                let parent = self.tree.get_by_ptr(parent_ptr);

                let mut created = Vec::new();
                let id = self.declare(&header, &mut created);
                match parent {
                    Some(parent) => {
                        if self.tree.get(id).and_then(|n| n.parent()) != Some(parent) {
                            self.tree.attach(parent, id);
                        }
                        debug!(
                            ptr = format_args!("{:#010x}", header.ptr),
                            parent = format_args!("{parent_ptr:#010x}"),
                            "<- StartNode"
                        );
                        self.events.push_back(TreeEvent::NodeDeclared {
                            ptr: header.ptr,
                            parent: parent_ptr,
                        });
                    }
                    None => {
                        trace!(parent = format_args!("{parent_ptr:#010x}"), "StartNode under unknown parent");
                        for id in created {
                            self.tree.remove_subtree(id);
                        }
                    }
                }
                Ok(())
            }
            start_node_mode::IDENTIFY => {
                let ptr = r.read_u32()?;
                trace!(
                    ptr = format_args!("{ptr:#010x}"),
                    known = self.tree.get_by_ptr(ptr).is_some(),
                    "<- StartNode identify"
                );
                Ok(())
            }
            other => Err(JorError::UnknownStartNodeMode(other)),
        }
    }

    fn handle_update_node(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        let ptr = r.read_u32()?;
        let Some(id) = self.tree.get_by_ptr(ptr) else {
            trace!(ptr = format_args!("{ptr:#010x}"), "update for unknown node dropped");
            return Ok(());
        };

        while !r.is_empty() {
            let code = r.read_u32()?;
            if TreeCommand::from_code(code) != Some(TreeCommand::UpdateControl) {
                return Err(JorError::UnknownCommand {
                    command: code,
                    context: "node update",
                });
            }
            let mode = r.read_u32()?;
            let control_id = r.read_u32()?;
            let Some(control) = self.tree.get_mut(id).and_then(|n| n.control_mut(control_id))
            else {
                debug!(
                    node = format_args!("{ptr:#010x}"),
                    id = control_id,
                    "update for unknown control, rest of stream skipped"
                );
                return Ok(());
            };
            control.apply_update(mode, r)?;
            trace!(id = control_id, mode, "<- UpdateControl");
            self.events.push_back(TreeEvent::ControlUpdated {
                node: ptr,
                id: control_id,
            });
        }
        Ok(())
    }

    fn handle_message_box(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        let return_ptr = r.read_u32()?;
        let parsed = read_message_box(return_ptr, r);
        self.send_ack_result(return_ptr, self.config.message_box_result);
        let event = parsed?;
        if let TreeEvent::MessageBox { message, title, .. } = &event {
            info!(title = %title, text = %message, "target opened a message box");
        }
        self.events.push_back(event);
        Ok(())
    }

    fn handle_shell_execute(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        let return_ptr = r.read_u32()?;
        let parsed = read_shell_execute(return_ptr, r);
        self.send_ack_result(return_ptr, self.config.shell_execute_result);
        let event = parsed?;
        if let TreeEvent::ShellExecute { file, parameters, .. } = &event {
            info!(file = %file, parameters = %parameters, "target requested shell execute");
        }
        self.events.push_back(event);
        Ok(())
    }
}

impl Default for ObjectTreeProtocol {
    fn default() -> Self {
        Self::new(ProtocolConfig::default())
    }
}

impl TagHandler for ObjectTreeProtocol {
    type Error = JorError;

    fn magic(&self) -> Magic {
        OREF_MAGIC
    }

    fn process_tag(&mut self, payload: &[u8]) -> Result<()> {
        self.process_message(payload, Instant::now())
    }

    fn take_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
    }
}

fn begin_event(ty: EventType) -> ByteWriter {
    let mut w = ByteWriter::new();
    w.put_u32(ty.code());
    w
}

fn expect_marker(r: &mut ByteReader<'_>, expected: u32) -> Result<()> {
    let found = r.read_u32()?;
    if found == expected {
        Ok(())
    } else {
        Err(JorError::UnexpectedMarker {
            found,
            expected,
            context: "InvalidNode",
        })
    }
}

fn read_message_box(return_ptr: u32, r: &mut ByteReader<'_>) -> Result<TreeEvent> {
    Ok(TreeEvent::MessageBox {
        return_ptr,
        message: r.read_sjis()?,
        title: r.read_sjis()?,
        style: r.read_u32()?,
    })
}

fn read_shell_execute(return_ptr: u32, r: &mut ByteReader<'_>) -> Result<TreeEvent> {
    Ok(TreeEvent::ShellExecute {
        return_ptr,
        file: r.read_sjis()?,
        parameters: r.read_sjis()?,
        directory: r.read_sjis()?,
        show: r.read_u32()?,
    })
}
