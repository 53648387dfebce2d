//! Wire codes for the `ORef` tag.
//!
//! Every payload starts with a big-endian `u32` code: an [`EventType`] on
//! messages we send, a [`MessageType`] on messages the target sends.

/// Host to target event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventType {
    GetRootObjectRef = 0x01,
    GenObjectInfo = 0x03,
    NodeEvent = 0x06,
    PropertyEvent = 0x07,
    Fio = 0x08,
    ResultS32 = 0x0A,
    ResultU32 = 0x0F,
}

impl EventType {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Target to host message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Reset = 0x00,
    GetRootObjectRef = 0x02,
    GenObjectInfo = 0x04,
    InvalidNode = 0x05,
    StartUpdateNode = 0x08,
    Fio = 0x09,
    OpenMessageBox = 0x0A,
    ShellExecute = 0x0B,
    StartNode = 0x0C,
}

impl MessageType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x00 => Self::Reset,
            0x02 => Self::GetRootObjectRef,
            0x04 => Self::GenObjectInfo,
            0x05 => Self::InvalidNode,
            0x08 => Self::StartUpdateNode,
            0x09 => Self::Fio,
            0x0A => Self::OpenMessageBox,
            0x0B => Self::ShellExecute,
            0x0C => Self::StartNode,
            _ => return None,
        })
    }
}

/// Commands inside `GenObjectInfo` and `StartUpdateNode` streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TreeCommand {
    StartNode = 0,
    EndNode = 1,
    GenControl = 2,
    GenNode = 3,
    StartSelector = 4,
    EndSelector = 5,
    SelectorItem = 6,
    UpdateControl = 8,
}

impl TreeCommand {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::StartNode,
            1 => Self::EndNode,
            2 => Self::GenControl,
            3 => Self::GenNode,
            4 => Self::StartSelector,
            5 => Self::EndSelector,
            6 => Self::SelectorItem,
            8 => Self::UpdateControl,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StartNode => "StartNode",
            Self::EndNode => "EndNode",
            Self::GenControl => "GenControl",
            Self::GenNode => "GenNode",
            Self::StartSelector => "StartSelector",
            Self::EndSelector => "EndSelector",
            Self::SelectorItem => "SelectorItem",
            Self::UpdateControl => "UpdateControl",
        }
    }
}

/// `InvalidNode` payloads are bracketed by these words.
pub const INVALID_NODE_HEAD: u32 = 0x07;
pub const INVALID_NODE_TAIL: u32 = 0x03;

/// `StartNode` sub-modes.
pub mod start_node_mode {
    pub const START: u32 = 0;
    pub const GEN: u32 = 3;
    pub const IDENTIFY: u32 = 11;
}

/// Node header flag: a second flag word follows the first.
pub const NODE_FLAG_HAS_FLAG2: u32 = 0x04;

/// Control kind bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindFlags(pub u32);

impl KindFlags {
    pub const HAS_LISTENER: u32 = 0x4000_0000;
    pub const VALUE_ID: u32 = 0x2000_0000;
    pub const FLOAT_VALUE: u32 = 0x0000_0200;
    pub const SIZE_MASK: u32 = 0x0000_00FF;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn has_listener(self) -> bool {
        self.0 & Self::HAS_LISTENER != 0
    }

    pub fn has_value_id(self) -> bool {
        self.0 & Self::VALUE_ID != 0
    }

    pub fn is_float(self) -> bool {
        self.0 & Self::FLOAT_VALUE != 0
    }

    /// Declared size of the inline value; zero means no value follows.
    pub fn value_size(self) -> u32 {
        self.0 & Self::SIZE_MASK
    }
}

/// `UpdateControl` mode bits. Unset bits mean the field is absent.
///
/// Unverified: no existing host decodes `StartUpdateNode` past the record
/// header, so this table has not been checked against a live target. Fields
/// are read in the order NAME, VALUE, RANGE, MAX_CHARS, ITEM_CLEAR, ITEM_ADD.
/// If a target's updates desync, suspect these bits first.
pub mod update_mode {
    pub const VALUE: u32 = 0x0001;
    pub const RANGE: u32 = 0x0002;
    pub const NAME: u32 = 0x0004;
    pub const MAX_CHARS: u32 = 0x0008;
    pub const ITEM_CLEAR: u32 = 0x0100;
    pub const ITEM_ADD: u32 = 0x0200;
}
