//! Remote properties attached to a node.

use mchi_frame::{ByteReader, ByteWriter, Magic};
use tracing::trace;

use crate::error::{JorError, Result};
use crate::message::{update_mode, KindFlags};

pub const LABEL: Magic = Magic::new(*b"LABL");
pub const BUTTON: Magic = Magic::new(*b"BUTN");
pub const CHECK_BOX: Magic = Magic::new(*b"CHBX");
pub const RANGE_INT: Magic = Magic::new(*b"RNGi");
pub const RANGE_FLOAT: Magic = Magic::new(*b"RNGf");
pub const COMBO_BOX: Magic = Magic::new(*b"CMBX");
pub const RADIO_BUTTON: Magic = Magic::new(*b"RBTN");
pub const EDIT_BOX: Magic = Magic::new(*b"EDBX");
pub const GROUP_BOX: Magic = Magic::new(*b"GRBX");

/// Layout rectangle suggested by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlLocation {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
}

impl ControlLocation {
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            x: r.read_i16()?,
            y: r.read_i16()?,
            width: r.read_i16()?,
            height: r.read_i16()?,
        })
    }
}

/// One choice of a combo box or radio group.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorItem {
    pub name: String,
    /// Value sent back when this item is chosen.
    pub value: u32,
    pub aux_flags: u32,
    pub location: ControlLocation,
}

impl SelectorItem {
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            name: r.read_sjis()?,
            value: r.read_u32()?,
            aux_flags: r.read_u32()?,
            location: ControlLocation::read(r)?,
        })
    }
}

/// Variant-specific state of a control.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Label,
    Button,
    CheckBox { value: bool, mask: u16 },
    RangeInt { min: i32, max: i32, value: i32 },
    RangeFloat { min: f32, max: f32, value: f32 },
    Selector { items: Vec<SelectorItem>, value: u32 },
    EditBox { text: String, max_chars: u16 },
    GroupBox,
    /// A type code this host does not know. Rendered by name only.
    Unimplemented,
}

impl ControlValue {
    fn kind_name(&self) -> &'static str {
        match self {
            ControlValue::Label => "label",
            ControlValue::Button => "button",
            ControlValue::CheckBox { .. } => "check box",
            ControlValue::RangeInt { .. } => "int range",
            ControlValue::RangeFloat { .. } => "float range",
            ControlValue::Selector { .. } => "selector",
            ControlValue::EditBox { .. } => "edit box",
            ControlValue::GroupBox => "group box",
            ControlValue::Unimplemented => "unimplemented",
        }
    }

    /// Update bits this variant knows how to read.
    fn update_bits(&self) -> u32 {
        use update_mode::*;
        match self {
            ControlValue::CheckBox { .. } => NAME | VALUE,
            ControlValue::Selector { .. } => NAME | VALUE | ITEM_CLEAR | ITEM_ADD,
            ControlValue::RangeInt { .. } | ControlValue::RangeFloat { .. } => NAME | VALUE | RANGE,
            ControlValue::EditBox { .. } => NAME | VALUE | MAX_CHARS,
            _ => NAME,
        }
    }
}

/// A value change requested by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlInput {
    /// Press a button.
    Click,
    Bool(bool),
    Int(i32),
    Float(f32),
    /// Choose a selector item by index.
    Select(usize),
    Text(String),
}

impl ControlInput {
    fn kind_name(&self) -> &'static str {
        match self {
            ControlInput::Click => "click",
            ControlInput::Bool(_) => "bool",
            ControlInput::Int(_) => "int",
            ControlInput::Float(_) => "float",
            ControlInput::Select(_) => "selection",
            ControlInput::Text(_) => "text",
        }
    }
}

/// A remote property.
#[derive(Debug, Clone, PartialEq)]
pub struct JorControl {
    pub type_tag: Magic,
    pub kind: KindFlags,
    pub name: String,
    pub style: u32,
    /// Unique within the owning node.
    pub id: u32,
    pub listener_ptr: Option<u32>,
    pub location: ControlLocation,
    pub value: ControlValue,
}

impl JorControl {
    /// Decode a control record from a `GenControl`/`StartSelector` command.
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let type_tag = r.read_magic()?;
        let mut kind = KindFlags(r.read_u32()?);
        let name = r.read_sjis()?;
        let style = r.read_u32()?;
        let id = r.read_u32()?;
        trace!(%type_tag, kind = kind.bits(), name = %name, id, "<- control");

        let listener_ptr = if kind.has_listener() {
            Some(r.read_u32()?)
        } else {
            None
        };

        if kind.has_value_id() && type_tag != EDIT_BOX {
            kind = KindFlags(kind.bits() | 0x20);
        }

        let mut value_u = u32::MAX;
        let mut value_f = 0.0f32;
        if kind.value_size() != 0 {
            if kind.is_float() {
                value_f = r.read_f32()?;
            } else {
                value_u = r.read_u32()?;
            }
        }

        let value = match type_tag {
            LABEL => ControlValue::Label,
            BUTTON => ControlValue::Button,
            GROUP_BOX => ControlValue::GroupBox,
            CHECK_BOX => ControlValue::CheckBox {
                value: value_u & 0xFF != 0,
                mask: (value_u >> 16) as u16,
            },
            RANGE_INT => ControlValue::RangeInt {
                min: r.read_i32()?,
                max: r.read_i32()?,
                value: value_u as i32,
            },
            RANGE_FLOAT => ControlValue::RangeFloat {
                min: r.read_f32()?,
                max: r.read_f32()?,
                value: value_f,
            },
            COMBO_BOX | RADIO_BUTTON => ControlValue::Selector {
                items: Vec::new(),
                value: value_u,
            },
            EDIT_BOX => ControlValue::EditBox {
                max_chars: r.read_u16()?,
                text: r.read_sjis()?,
            },
            _ => ControlValue::Unimplemented,
        };

        Ok(Self {
            type_tag,
            kind,
            name,
            style,
            id,
            listener_ptr,
            location: ControlLocation::read(r)?,
            value,
        })
    }

    /// Index of the selected item, for selectors whose value matches one.
    pub fn selected_index(&self) -> Option<usize> {
        match &self.value {
            ControlValue::Selector { items, value } => items.iter().position(|i| i.value == *value),
            _ => None,
        }
    }

    pub(crate) fn push_item(&mut self, item: SelectorItem) -> bool {
        match &mut self.value {
            ControlValue::Selector { items, .. } => {
                items.push(item);
                true
            }
            _ => false,
        }
    }

    /// Apply a requested value. Returns `false` when it equals the current
    /// value and nothing needs to be sent.
    pub(crate) fn apply_input(&mut self, input: ControlInput) -> Result<bool> {
        let mismatch = JorError::ValueMismatch {
            control: self.type_tag,
            input: input.kind_name(),
        };
        match (&mut self.value, input) {
            (ControlValue::Button, ControlInput::Click) => Ok(true),
            (ControlValue::CheckBox { value, .. }, ControlInput::Bool(new)) => {
                Ok(replace_if_changed(value, new))
            }
            (ControlValue::RangeInt { value, .. }, ControlInput::Int(new)) => {
                Ok(replace_if_changed(value, new))
            }
            (ControlValue::RangeFloat { value, .. }, ControlInput::Float(new)) => {
                Ok(replace_if_changed(value, new))
            }
            (ControlValue::Selector { items, value }, ControlInput::Select(index)) => {
                let item = items
                    .get(index)
                    .ok_or(JorError::SelectorIndexOutOfRange {
                        index,
                        len: items.len(),
                    })?;
                Ok(replace_if_changed(value, item.value))
            }
            (ControlValue::EditBox { text, .. }, ControlInput::Text(new)) => {
                Ok(replace_if_changed(text, new))
            }
            _ => Err(mismatch),
        }
    }

    /// Encode a `PropertyEvent` body carrying the current value.
    pub(crate) fn write_property_event(&self, node_ptr: u32, w: &mut ByteWriter) -> Result<()> {
        w.put_u32(node_ptr)
            .put_u32(0)
            .put_magic(self.type_tag)
            .put_u32(self.kind.bits())
            .put_u32(self.id)
            .put_u32(self.listener_ptr.unwrap_or(0));

        match &self.value {
            ControlValue::Button => {
                w.put_u32(0);
            }
            ControlValue::CheckBox { value, mask } => {
                w.put_u32(4).put_u16(u16::from(*value)).put_u16(*mask);
            }
            ControlValue::RangeInt { value, .. } => {
                w.put_u32(4).put_i32(*value);
            }
            ControlValue::RangeFloat { value, .. } => {
                w.put_u32(4).put_f32(*value);
            }
            ControlValue::Selector { value, .. } => {
                w.put_u32(4).put_u32(*value);
            }
            ControlValue::EditBox { text, .. } => {
                let bytes = mchi_frame::sjis::encode(text);
                w.put_u32(bytes.len() as u32).put_slice(&bytes);
            }
            other => {
                return Err(JorError::ValueMismatch {
                    control: self.type_tag,
                    input: other.kind_name(),
                })
            }
        }
        Ok(())
    }

    /// Apply an `UpdateControl` record.
    ///
    /// Fields are read in a fixed order (name, value, range, max chars, item
    /// clear, item add) and only when their bit is set. A bit the variant
    /// does not describe leaves the rest of the stream unparseable. The bit
    /// layout is unverified; see [`update_mode`](crate::message::update_mode).
    pub(crate) fn apply_update(&mut self, mode: u32, r: &mut ByteReader<'_>) -> Result<()> {
        let unsupported = mode & !self.value.update_bits();
        if unsupported != 0 {
            return Err(JorError::UnsupportedUpdate {
                control: self.type_tag,
                mode,
            });
        }

        if mode & update_mode::NAME != 0 {
            self.name = r.read_sjis()?;
        }
        if mode & update_mode::VALUE != 0 {
            match &mut self.value {
                ControlValue::CheckBox { value, mask } => {
                    let raw = r.read_u32()?;
                    *value = raw & 0xFF != 0;
                    *mask = (raw >> 16) as u16;
                }
                ControlValue::RangeInt { value, .. } => *value = r.read_i32()?,
                ControlValue::RangeFloat { value, .. } => *value = r.read_f32()?,
                ControlValue::Selector { value, .. } => *value = r.read_u32()?,
                ControlValue::EditBox { text, .. } => *text = r.read_sjis()?,
                _ => {}
            }
        }
        if mode & update_mode::RANGE != 0 {
            match &mut self.value {
                ControlValue::RangeInt { min, max, .. } => {
                    *min = r.read_i32()?;
                    *max = r.read_i32()?;
                }
                ControlValue::RangeFloat { min, max, .. } => {
                    *min = r.read_f32()?;
                    *max = r.read_f32()?;
                }
                _ => {}
            }
        }
        if mode & update_mode::MAX_CHARS != 0 {
            if let ControlValue::EditBox { max_chars, .. } = &mut self.value {
                *max_chars = r.read_u16()?;
            }
        }
        if let ControlValue::Selector { items, .. } = &mut self.value {
            if mode & update_mode::ITEM_CLEAR != 0 {
                items.clear();
            }
            if mode & update_mode::ITEM_ADD != 0 {
                items.push(SelectorItem::read(r)?);
            }
        }
        Ok(())
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, new: T) -> bool {
    if *slot == new {
        false
    } else {
        *slot = new;
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode a control record the way the target does.
    pub(crate) fn control_record(
        type_tag: Magic,
        kind: u32,
        name: &str,
        id: u32,
        tail: impl FnOnce(&mut ByteWriter),
    ) -> ByteWriter {
        let mut w = ByteWriter::new();
        w.put_magic(type_tag).put_u32(kind);
        w.put_sjis(name).unwrap();
        w.put_u32(0).put_u32(id);
        tail(&mut w);
        w
    }

    fn location(w: &mut ByteWriter) {
        w.put_i16(1).put_i16(2).put_i16(100).put_i16(20);
    }

    fn decode(w: ByteWriter) -> JorControl {
        let bytes = w.freeze();
        let mut r = ByteReader::new(&bytes);
        let control = JorControl::read(&mut r).unwrap();
        assert!(r.is_empty(), "{} bytes left over", r.remaining());
        control
    }

    #[test]
    fn decodes_checkbox_mask_and_value() {
        let control = decode(control_record(CHECK_BOX, 0x04, "Show", 3, |w| {
            w.put_u32(0x0002_0001);
            location(w);
        }));
        assert_eq!(control.value, ControlValue::CheckBox { value: true, mask: 2 });
        assert_eq!(
            control.location,
            ControlLocation { x: 1, y: 2, width: 100, height: 20 }
        );
    }

    #[test]
    fn decodes_ranges() {
        let int = decode(control_record(RANGE_INT, 0x04, "Speed", 1, |w| {
            w.put_i32(-5).put_i32(-10).put_i32(10);
            location(w);
        }));
        assert_eq!(int.value, ControlValue::RangeInt { min: -10, max: 10, value: -5 });

        let float = decode(control_record(
            RANGE_FLOAT,
            KindFlags::FLOAT_VALUE | 0x04,
            "Scale",
            2,
            |w| {
                w.put_f32(0.5).put_f32(0.0).put_f32(1.0);
                location(w);
            },
        ));
        assert_eq!(float.value, ControlValue::RangeFloat { min: 0.0, max: 1.0, value: 0.5 });
    }

    #[test]
    fn listener_and_value_id_flags() {
        let kind = KindFlags::HAS_LISTENER | KindFlags::VALUE_ID;
        let control = decode(control_record(COMBO_BOX, kind, "Mode", 9, |w| {
            w.put_u32(0x8000_1234);
            // VALUE_ID forces a 4-byte value.
            w.put_u32(2);
            location(w);
        }));
        assert_eq!(control.listener_ptr, Some(0x8000_1234));
        assert_eq!(control.kind.bits(), kind | 0x20);
        assert_eq!(control.value, ControlValue::Selector { items: vec![], value: 2 });
    }

    #[test]
    fn edit_box_ignores_value_id() {
        let control = decode(control_record(EDIT_BOX, KindFlags::VALUE_ID, "Label", 4, |w| {
            w.put_u16(32);
            w.put_sjis("hello").unwrap();
            location(w);
        }));
        assert_eq!(
            control.value,
            ControlValue::EditBox { text: "hello".into(), max_chars: 32 }
        );
    }

    #[test]
    fn unknown_type_decodes_generically() {
        let control = decode(control_record(Magic::new(*b"XXXX"), 0, "Future", 5, location));
        assert_eq!(control.value, ControlValue::Unimplemented);
        assert_eq!(control.name, "Future");
    }

    #[test]
    fn checkbox_change_detection() {
        let mut control = decode(control_record(CHECK_BOX, 0x04, "Show", 3, |w| {
            w.put_u32(0x0001_0000);
            location(w);
        }));
        assert!(!control.apply_input(ControlInput::Bool(false)).unwrap());
        assert!(control.apply_input(ControlInput::Bool(true)).unwrap());
        assert!(matches!(
            control.apply_input(ControlInput::Int(1)),
            Err(JorError::ValueMismatch { .. })
        ));
    }

    #[test]
    fn property_event_bodies() {
        let mut control = decode(control_record(RANGE_INT, 0x04, "Speed", 1, |w| {
            w.put_i32(0).put_i32(0).put_i32(100);
            location(w);
        }));
        control.apply_input(ControlInput::Int(42)).unwrap();

        let mut w = ByteWriter::new();
        control.write_property_event(0x8040_0000, &mut w).unwrap();
        let body = w.freeze();
        let mut r = ByteReader::new(&body);
        assert_eq!(r.read_u32().unwrap(), 0x8040_0000);
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_magic().unwrap(), RANGE_INT);
        assert_eq!(r.read_u32().unwrap(), 0x04);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_u32().unwrap(), 4);
        assert_eq!(r.read_i32().unwrap(), 42);
        assert!(r.is_empty());

        let label = decode(control_record(LABEL, 0, "Title", 2, location));
        assert!(label.write_property_event(0, &mut ByteWriter::new()).is_err());
    }

    #[test]
    fn selector_update_replaces_items() {
        let mut control = decode(control_record(RADIO_BUTTON, 0x04, "Pick", 7, |w| {
            w.put_u32(0);
            location(w);
        }));
        control.push_item(SelectorItem {
            name: "old".into(),
            value: 0,
            aux_flags: 0,
            location: ControlLocation::default(),
        });

        let mut w = ByteWriter::new();
        w.put_u32(5);
        w.put_sjis("new").unwrap();
        w.put_u32(5).put_u32(0);
        location(&mut w);
        let body = w.freeze();
        let mode = update_mode::VALUE | update_mode::ITEM_CLEAR | update_mode::ITEM_ADD;
        control.apply_update(mode, &mut ByteReader::new(&body)).unwrap();

        assert_eq!(control.selected_index(), Some(0));
        match &control.value {
            ControlValue::Selector { items, value } => {
                assert_eq!(*value, 5);
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].name, "new");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn update_reads_only_flagged_fields() {
        let mut control = decode(control_record(RANGE_FLOAT, KindFlags::FLOAT_VALUE | 4, "S", 1, |w| {
            w.put_f32(0.0).put_f32(0.0).put_f32(1.0);
            location(w);
        }));

        let mut w = ByteWriter::new();
        w.put_sjis("Scale").unwrap();
        w.put_f32(-1.0).put_f32(2.0);
        let body = w.freeze();
        let mut r = ByteReader::new(&body);
        control
            .apply_update(update_mode::NAME | update_mode::RANGE, &mut r)
            .unwrap();
        assert!(r.is_empty());
        assert_eq!(control.name, "Scale");
        assert_eq!(control.value, ControlValue::RangeFloat { min: -1.0, max: 2.0, value: 0.0 });
    }

    #[test]
    fn unimplemented_update_beyond_name_aborts() {
        let mut control = decode(control_record(Magic::new(*b"XXXX"), 0, "F", 5, location));
        assert!(control
            .apply_update(update_mode::NAME, &mut ByteReader::new(b"\x00\x01A"))
            .is_ok());
        assert!(matches!(
            control.apply_update(update_mode::VALUE, &mut ByteReader::new(&[0; 4])),
            Err(JorError::UnsupportedUpdate { .. })
        ));
    }
}
