use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mchi_jor::{
    ControlValue, JorControl, NodeId, NodePtr, NodeTree, Translate, TreeEvent, UNSET_NODE_PTR,
};
use mchi_transport::{Magic, RingGeometry, RingStatus};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn format_ptr(ptr: NodePtr) -> String {
    if ptr == UNSET_NODE_PTR {
        "unset".to_string()
    } else {
        format!("{ptr:#010x}")
    }
}

#[derive(Serialize)]
pub struct RingView {
    pub base: String,
    pub size: usize,
    pub magic: String,
    pub ready: bool,
    pub read_cursor: String,
    pub write_cursor: String,
    pub unread: Option<usize>,
}

impl RingView {
    pub fn new(geometry: RingGeometry, magic: Magic, status: RingStatus) -> Self {
        Self {
            base: format!("{:#06x}", geometry.base),
            size: geometry.size,
            magic: magic.to_string(),
            ready: status.ready,
            read_cursor: format!("{:#06x}", status.read_cursor),
            write_cursor: format!("{:#06x}", status.write_cursor),
            unread: status.unread,
        }
    }
}

#[derive(Serialize)]
pub struct StatusOutput {
    pub source: String,
    pub attached: bool,
    pub ready: bool,
    pub outbound: RingView,
    pub inbound: RingView,
}

pub fn print_status(out: &StatusOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["RING", "BASE", "SIZE", "MAGIC", "READY", "READ", "WRITE", "UNREAD"]);
            for (name, ring) in [("outbound", &out.outbound), ("inbound", &out.inbound)] {
                table.add_row(vec![
                    name.to_string(),
                    ring.base.clone(),
                    format!("{:#x}", ring.size),
                    ring.magic.clone(),
                    ring.ready.to_string(),
                    ring.read_cursor.clone(),
                    ring.write_cursor.clone(),
                    ring.unread.map_or_else(|| "-".to_string(), |n| n.to_string()),
                ]);
            }
            println!("{}: {}", out.source, if out.ready { "ready" } else { "not ready" });
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Region:   {}", out.source);
            println!("Attached: {}", out.attached);
            println!("Ready:    {}", out.ready);
            for (name, ring) in [("Outbound", &out.outbound), ("Inbound", &out.inbound)] {
                println!(
                    "{name:<9} base={} size={:#x} magic={} read={} write={} unread={}",
                    ring.base,
                    ring.size,
                    ring.magic,
                    ring.read_cursor,
                    ring.write_cursor,
                    ring.unread.map_or_else(|| "?".to_string(), |n| n.to_string())
                );
            }
        }
        OutputFormat::Raw => println!("{}", if out.ready { "ready" } else { "not-ready" }),
    }
}

#[derive(Serialize)]
pub struct ControlView {
    pub id: u32,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub name: String,
    pub value: Value,
}

impl ControlView {
    fn new(control: &JorControl, names: &dyn Translate) -> Self {
        Self {
            id: control.id,
            type_tag: control.type_tag.to_string(),
            name: names.translate(&control.name).into_owned(),
            value: control_value(control, names),
        }
    }
}

#[derive(Serialize)]
pub struct NodeView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    pub ptr: String,
    pub status: &'static str,
    pub controls: Vec<ControlView>,
    pub children: Vec<NodeView>,
}

impl NodeView {
    /// Snapshot `id` and up to `max_depth` levels below it.
    pub fn build(
        tree: &NodeTree,
        id: NodeId,
        names: &dyn Translate,
        max_depth: Option<usize>,
    ) -> Option<Self> {
        let node = tree.get(id)?;
        let name = names.translate(node.name()).into_owned();
        let source_name = (name != node.name()).then(|| node.name().to_string());
        let children = match max_depth {
            Some(0) => Vec::new(),
            _ => node
                .children()
                .iter()
                .filter_map(|&c| Self::build(tree, c, names, max_depth.map(|d| d - 1)))
                .collect(),
        };
        Some(Self {
            name,
            source_name,
            ptr: format_ptr(node.ptr()),
            status: node.status().as_str(),
            controls: node
                .controls()
                .iter()
                .map(|c| ControlView::new(c, names))
                .collect(),
            children,
        })
    }

    fn walk<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a NodeView, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk(depth + 1, visit);
        }
    }
}

#[derive(Serialize)]
pub struct TreeOutput {
    pub settled: bool,
    pub nodes: usize,
    pub root: NodeView,
}

pub fn print_tree(out: &TreeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NODE", "PTR", "STATUS", "CONTROL", "VALUE"]);
            out.root.walk(0, &mut |node, depth| {
                table.add_row(vec![
                    format!("{}{}", "  ".repeat(depth), node.name),
                    node.ptr.clone(),
                    node.status.to_string(),
                    String::new(),
                    String::new(),
                ]);
                for control in &node.controls {
                    table.add_row(vec![
                        String::new(),
                        String::new(),
                        String::new(),
                        format!("[{}] {} #{}", control.type_tag, control.name, control.id),
                        value_text(&control.value),
                    ]);
                }
            });
            println!("{table}");
        }
        OutputFormat::Pretty => {
            out.root.walk(0, &mut |node, depth| {
                let indent = "  ".repeat(depth);
                println!("{indent}{} ({}, {})", node.name, node.ptr, node.status);
                for control in &node.controls {
                    println!(
                        "{indent}  - [{}] {} #{} = {}",
                        control.type_tag,
                        control.name,
                        control.id,
                        value_text(&control.value)
                    );
                }
            });
            if !out.settled {
                println!("(incomplete: some nodes never answered)");
            }
        }
        OutputFormat::Raw => {
            let mut path: Vec<&str> = Vec::new();
            out.root.walk(0, &mut |node, depth| {
                path.truncate(depth);
                path.push(&node.name);
                println!("{}\t{}", node.ptr, path.join("/"));
            });
        }
    }
}

fn control_value(control: &JorControl, names: &dyn Translate) -> Value {
    match &control.value {
        ControlValue::CheckBox { value, .. } => json!(value),
        ControlValue::RangeInt { min, max, value } => {
            json!({ "value": value, "min": min, "max": max })
        }
        ControlValue::RangeFloat { min, max, value } => {
            json!({ "value": value, "min": min, "max": max })
        }
        ControlValue::Selector { items, value } => {
            let selected = control.selected_index();
            let items: Vec<String> = items
                .iter()
                .map(|i| names.translate(&i.name).into_owned())
                .collect();
            json!({
                "value": value,
                "selected": selected.and_then(|i| items.get(i)),
                "items": items,
            })
        }
        ControlValue::EditBox { text, .. } => json!(text),
        ControlValue::Label
        | ControlValue::Button
        | ControlValue::GroupBox
        | ControlValue::Unimplemented => Value::Null,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => format!("{s:?}"),
        Value::Object(map) => match (map.get("selected"), map.get("min"), map.get("max")) {
            (Some(selected), _, _) => match selected {
                Value::String(s) => s.clone(),
                _ => format!("{} (no matching item)", map.get("value").unwrap_or(&Value::Null)),
            },
            (None, Some(min), Some(max)) => format!(
                "{} [{min}..{max}]",
                map.get("value").unwrap_or(&Value::Null)
            ),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

#[derive(Serialize)]
pub struct EventOutput {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: String,
}

impl EventOutput {
    fn bare(event: &'static str) -> Self {
        Self {
            event,
            ptr: None,
            name: None,
            parent: None,
            control: None,
            detail: None,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn with_name(self, name: Option<String>) -> Self {
        Self { name, ..self }
    }

    pub fn attached(attached: bool) -> Self {
        Self::bare(if attached { "attached" } else { "detached" })
    }

    pub fn from_tree_event(event: &TreeEvent) -> Self {
        match event {
            TreeEvent::TreeReset => Self::bare("tree_reset"),
            TreeEvent::RootIdentified { ptr } => Self {
                ptr: Some(format_ptr(*ptr)),
                ..Self::bare("root_identified")
            },
            TreeEvent::NodeValid { ptr } => Self {
                ptr: Some(format_ptr(*ptr)),
                ..Self::bare("node_valid")
            },
            TreeEvent::NodeInvalidated { ptr } => Self {
                ptr: Some(format_ptr(*ptr)),
                ..Self::bare("node_invalidated")
            },
            TreeEvent::NodeDeclared { ptr, parent } => Self {
                ptr: Some(format_ptr(*ptr)),
                parent: Some(format_ptr(*parent)),
                ..Self::bare("node_declared")
            },
            TreeEvent::ControlUpdated { node, id } => Self {
                ptr: Some(format_ptr(*node)),
                control: Some(*id),
                ..Self::bare("control_updated")
            },
            TreeEvent::MessageBox { title, message, .. } => Self {
                detail: Some(format!("{title}: {message}")),
                ..Self::bare("message_box")
            },
            TreeEvent::ShellExecute {
                file, parameters, ..
            } => Self {
                detail: Some(format!("{file} {parameters}").trim_end().to_string()),
                ..Self::bare("shell_execute")
            },
        }
    }
}

pub fn print_event(out: &EventOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut line = out.event.to_string();
            if let Some(ptr) = &out.ptr {
                line.push_str(&format!(" ptr={ptr}"));
            }
            if let Some(name) = &out.name {
                line.push_str(&format!(" name={name:?}"));
            }
            if let Some(parent) = &out.parent {
                line.push_str(&format!(" parent={parent}"));
            }
            if let Some(control) = out.control {
                line.push_str(&format!(" control={control}"));
            }
            if let Some(detail) = &out.detail {
                line.push_str(&format!(" {detail:?}"));
            }
            println!("{line}");
        }
        OutputFormat::Raw => println!("{}", out.event),
    }
}

#[derive(Serialize)]
pub struct SetOutput {
    pub node: String,
    pub control: u32,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: Value,
    pub changed: bool,
}

impl SetOutput {
    pub fn new(node: NodePtr, control: &JorControl, changed: bool, names: &dyn Translate) -> Self {
        Self {
            node: format_ptr(node),
            control: control.id,
            type_tag: control.type_tag.to_string(),
            value: control_value(control, names),
            changed,
        }
    }
}

pub fn print_set(out: &SetOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let state = if out.changed { "sent" } else { "unchanged" };
            println!(
                "{} control #{} [{}] = {} ({state})",
                out.node,
                out.control,
                out.type_tag,
                value_text(&out.value)
            );
        }
        OutputFormat::Raw => println!("{}", out.changed),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use mchi_jor::Passthrough;

    use super::*;

    #[test]
    fn ptr_formatting() {
        assert_eq!(format_ptr(0x8040_0000), "0x80400000");
        assert_eq!(format_ptr(UNSET_NODE_PTR), "unset");
    }

    #[test]
    fn empty_tree_view_is_bare_root() {
        let tree = NodeTree::new();
        let view = NodeView::build(&tree, tree.root(), &Passthrough, None).expect("root exists");
        assert_eq!(view.ptr, "unset");
        assert_eq!(view.status, "valid");
        assert!(view.children.is_empty());
        assert!(view.source_name.is_none());
    }

    #[test]
    fn value_text_shapes() {
        assert_eq!(value_text(&json!(true)), "true");
        assert_eq!(value_text(&json!({"value": 3, "min": 0, "max": 9})), "3 [0..9]");
        assert_eq!(
            value_text(&json!({"value": 2, "selected": "Debug", "items": ["Normal", "Debug"]})),
            "Debug"
        );
        assert_eq!(value_text(&json!("hi")), "\"hi\"");
        assert_eq!(value_text(&Value::Null), "");
    }

    #[test]
    fn events_carry_pointers() {
        let out = EventOutput::from_tree_event(&TreeEvent::NodeDeclared {
            ptr: 0x8000_0010,
            parent: 0x8000_0000,
        });
        assert_eq!(out.event, "node_declared");
        assert_eq!(out.ptr.as_deref(), Some("0x80000010"));
        assert_eq!(out.parent.as_deref(), Some("0x80000000"));
    }
}
