use mchi_jor::UNSET_NODE_PTR;
use tracing::warn;

use crate::cmd::{is_settled, open_session, parse_duration, pump_until, NameTable, TreeArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{format_ptr, print_tree, NodeView, OutputFormat, TreeOutput};

pub fn run(args: TreeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let names = NameTable::open(args.dictionary.as_deref())?;
    let mut session = open_session(&args.target)?;

    let settled = pump_until(&mut session, timeout, |s| {
        s.protocol().is_some_and(|p| {
            let tree = p.tree();
            let start = match args.node {
                Some(ptr) => tree.get_by_ptr(ptr),
                None => Some(tree.root()),
            };
            start.is_some_and(|id| is_settled(tree, id))
        })
    })?;

    let Some(protocol) = session.protocol() else {
        return Err(CliError::timeout(format!(
            "no target attached within {timeout:?}"
        )));
    };
    let tree = protocol.tree();
    let root_known = tree
        .get(tree.root())
        .is_some_and(|r| r.ptr() != UNSET_NODE_PTR);
    if !root_known {
        return Err(CliError::timeout(format!(
            "target did not identify its root within {timeout:?}"
        )));
    }

    let start = match args.node {
        Some(ptr) => tree.get_by_ptr(ptr).ok_or_else(|| {
            CliError::timeout(format!("node {} was never declared", format_ptr(ptr)))
        })?,
        None => tree.root(),
    };
    let root = NodeView::build(tree, start, names.translator(), args.depth)
        .ok_or_else(|| CliError::new(INTERNAL, "tree changed while printing"))?;

    if !settled {
        warn!(?timeout, "some nodes did not answer in time");
    }
    print_tree(
        &TreeOutput {
            settled,
            nodes: tree.depth_first_from(start).len(),
            root,
        },
        format,
    );
    names.finish()?;

    Ok(if settled { SUCCESS } else { TIMEOUT })
}
