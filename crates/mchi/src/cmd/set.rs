use mchi_jor::{ControlInput, ControlValue, JorControl, NodeStatus, Passthrough};

use crate::cmd::{open_session, parse_duration, pump_until, SetArgs};
use crate::exit::{jor_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{format_ptr, print_set, OutputFormat, SetOutput};

pub fn run(args: SetArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut session = open_session(&args.target)?;

    let found = pump_until(&mut session, timeout, |s| {
        s.protocol().is_some_and(|p| {
            let tree = p.tree();
            tree.get_by_ptr(args.node)
                .and_then(|id| tree.get(id))
                .is_some_and(|n| n.status() == NodeStatus::Valid)
        })
    })?;
    if !found {
        return Err(CliError::timeout(format!(
            "node {} was not fetched within {timeout:?}",
            format_ptr(args.node)
        )));
    }

    let (id, input) = {
        let tree = session
            .protocol()
            .map(|p| p.tree())
            .ok_or_else(|| CliError::new(FAILURE, "target detached"))?;
        let id = tree
            .get_by_ptr(args.node)
            .ok_or_else(|| CliError::new(FAILURE, "node disappeared"))?;
        let control = tree
            .get(id)
            .and_then(|n| n.control(args.control))
            .ok_or_else(|| {
                CliError::usage(format!(
                    "node {} has no control {}",
                    format_ptr(args.node),
                    args.control
                ))
            })?;
        (id, parse_input(control, args.value.as_deref())?)
    };

    let changed = session
        .set_value(id, args.control, input)
        .map_err(|err| jor_error("set failed", err))?;
    if changed {
        let delivered = pump_until(&mut session, timeout, |s| {
            s.is_connected() && s.unsent_len() == 0
        })?;
        if !delivered {
            return Err(CliError::timeout(format!(
                "property event not written within {timeout:?}; the target is not draining its ring"
            )));
        }
    }

    let control = session
        .protocol()
        .and_then(|p| p.tree().get(id))
        .and_then(|n| n.control(args.control))
        .ok_or_else(|| CliError::new(FAILURE, "target detached"))?;
    print_set(
        &SetOutput::new(args.node, control, changed, &Passthrough),
        format,
    );
    Ok(SUCCESS)
}

/// Interpret a command-line value for a control's type.
fn parse_input(control: &JorControl, value: Option<&str>) -> CliResult<ControlInput> {
    let invalid = |v: &str| {
        CliError::usage(format!(
            "invalid value {v:?} for {} control {}",
            control.type_tag, control.id
        ))
    };

    match (&control.value, value) {
        (ControlValue::Button, _) => Ok(ControlInput::Click),
        (
            ControlValue::Label | ControlValue::GroupBox | ControlValue::Unimplemented,
            _,
        ) => Err(CliError::usage(format!(
            "{} controls cannot be set",
            control.type_tag
        ))),
        (_, None) => Err(CliError::usage(format!(
            "--value is required for {} controls",
            control.type_tag
        ))),
        (ControlValue::CheckBox { .. }, Some(v)) => match v.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(ControlInput::Bool(true)),
            "false" | "off" | "0" => Ok(ControlInput::Bool(false)),
            _ => Err(invalid(v)),
        },
        (ControlValue::RangeInt { .. }, Some(v)) => {
            v.parse().map(ControlInput::Int).map_err(|_| invalid(v))
        }
        (ControlValue::RangeFloat { .. }, Some(v)) => {
            v.parse().map(ControlInput::Float).map_err(|_| invalid(v))
        }
        (ControlValue::Selector { items, .. }, Some(v)) => match v.parse::<usize>() {
            Ok(index) => Ok(ControlInput::Select(index)),
            Err(_) => items
                .iter()
                .position(|item| item.name == v)
                .map(ControlInput::Select)
                .ok_or_else(|| invalid(v)),
        },
        (ControlValue::EditBox { .. }, Some(v)) => Ok(ControlInput::Text(v.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use mchi_jor::{ControlLocation, KindFlags, SelectorItem, CHECK_BOX, COMBO_BOX};

    use super::*;

    fn control(type_tag: mchi_frame::Magic, value: ControlValue) -> JorControl {
        JorControl {
            type_tag,
            kind: KindFlags(4),
            name: "c".into(),
            style: 0,
            id: 1,
            listener_ptr: None,
            location: ControlLocation::default(),
            value,
        }
    }

    #[test]
    fn checkbox_words() {
        let c = control(CHECK_BOX, ControlValue::CheckBox { value: false, mask: 1 });
        assert_eq!(parse_input(&c, Some("ON")).unwrap(), ControlInput::Bool(true));
        assert_eq!(parse_input(&c, Some("0")).unwrap(), ControlInput::Bool(false));
        assert!(parse_input(&c, Some("maybe")).is_err());
        assert!(parse_input(&c, None).is_err());
    }

    #[test]
    fn selector_by_index_or_name() {
        let item = |name: &str, value| SelectorItem {
            name: name.into(),
            value,
            aux_flags: 0,
            location: ControlLocation::default(),
        };
        let c = control(
            COMBO_BOX,
            ControlValue::Selector {
                items: vec![item("Normal", 10), item("Debug", 20)],
                value: 10,
            },
        );
        assert_eq!(parse_input(&c, Some("1")).unwrap(), ControlInput::Select(1));
        assert_eq!(parse_input(&c, Some("Debug")).unwrap(), ControlInput::Select(1));
        assert!(parse_input(&c, Some("Release")).is_err());
    }
}
