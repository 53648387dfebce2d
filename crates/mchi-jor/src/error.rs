use mchi_frame::{FrameError, Magic};
use mchi_transport::TransportError;

use crate::node::{NodeId, NodePtr};

/// Errors that can occur in object tree operations.
#[derive(Debug, thiserror::Error)]
pub enum JorError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error, including short payloads.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A tree command stream contained a command this context cannot parse.
    #[error("unknown {context} command {command:#x}")]
    UnknownCommand { command: u32, context: &'static str },

    /// A node-scoped command arrived before any `StartNode`.
    #[error("{command} outside of any node")]
    NoCurrentNode { command: &'static str },

    /// An object info stream ended with nodes still open.
    #[error("object info ended with {depth} unclosed node(s)")]
    UnbalancedNodeStack { depth: usize },

    /// An object info stream closed more nodes than it opened.
    #[error("EndNode without a matching StartNode")]
    UnexpectedEndNode,

    /// A fixed marker word did not have its expected value.
    #[error("unexpected marker {found:#x} in {context} (expected {expected:#x})")]
    UnexpectedMarker {
        found: u32,
        expected: u32,
        context: &'static str,
    },

    /// A `StartNode` message used a mode we cannot parse.
    #[error("unknown StartNode mode {0}")]
    UnknownStartNodeMode(u32),

    /// No target is attached, so there is no tree to act on.
    #[error("no target connected")]
    NotConnected,

    /// A node handle outlived its node.
    #[error("node {0} no longer exists")]
    StaleNode(NodeId),

    /// No control with this id on the node.
    #[error("no control {id} on node {node:#010x}")]
    ControlNotFound { node: NodePtr, id: u32 },

    /// The requested value does not fit the control's type.
    #[error("{control} control cannot take a {input} value")]
    ValueMismatch { control: Magic, input: &'static str },

    /// A selector index past the item list.
    #[error("selector index {index} out of range ({len} items)")]
    SelectorIndexOutOfRange { index: usize, len: usize },

    /// A live update carries fields this control type does not describe.
    #[error("update mode {mode:#x} not supported by {control} control")]
    UnsupportedUpdate { control: Magic, mode: u32 },

    /// Translation dictionary could not be read or written.
    #[error("dictionary {}: {source}", path.display())]
    Dictionary {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Translation dictionary is not valid JSON.
    #[error("dictionary json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JorError {
    /// Whether the session must be torn down. Decode faults only cost the
    /// message they occurred in.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            JorError::Transport(e) => e.is_session_fatal(),
            JorError::Frame(e) => e.is_session_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, JorError>;
