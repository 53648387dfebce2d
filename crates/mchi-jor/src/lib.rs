//! Object tree protocol for mchi.
//!
//! A target publishes its debug objects as a tree of nodes, each carrying
//! typed controls (check boxes, ranges, selectors, edit boxes and so on).
//! This crate mirrors that tree over the `ORef` tag:
//! - [`ObjectTreeProtocol`] decodes replies, tracks per-node fetch state and
//!   encodes requests and property events
//! - [`NodeTree`] stores the mirror in a generation-checked arena
//! - [`Session`] ties a transport, the tag router and the protocol into one
//!   poll loop that survives target restarts
//!
//! Nothing here spawns threads; the caller drives [`Session::pump`].

pub mod control;
pub mod error;
pub mod message;
pub mod node;
pub mod protocol;
pub mod session;
pub mod translate;

pub use control::{
    ControlInput, ControlLocation, ControlValue, JorControl, SelectorItem, BUTTON, CHECK_BOX,
    COMBO_BOX, EDIT_BOX, GROUP_BOX, LABEL, RADIO_BUTTON, RANGE_FLOAT, RANGE_INT,
};
pub use error::{JorError, Result};
pub use message::{EventType, KindFlags, MessageType, TreeCommand};
pub use node::{JorNode, NodeHeader, NodeId, NodePtr, NodeStatus, NodeTree, UNSET_NODE_PTR};
pub use protocol::{
    ObjectTreeProtocol, ProtocolConfig, TreeEvent, DEFAULT_REQUEST_TIMEOUT, OREF_MAGIC,
};
pub use session::{PumpReport, Session, SessionConfig};
pub use translate::{Passthrough, StringDictionary, Translate};
