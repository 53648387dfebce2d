use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use mchi_jor::{NodePtr, TreeEvent};
use mchi_transport::ring::DEFAULT_POLL_INTERVAL;
use tracing::warn;

use crate::cmd::{open_session, NameTable, WatchArgs};
use crate::exit::{CliError, CliResult, SUCCESS};
use crate::output::{print_event, EventOutput, OutputFormat};

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let names = NameTable::open(args.dictionary.as_deref())?;
    let mut session = open_session(&args.target)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    let mut attached = false;

    while running.load(Ordering::SeqCst) {
        let report = match session.pump() {
            Ok(report) => report,
            Err(err) => {
                // The session already dropped its tree; it rebuilds on the
                // next pump if the rings are still there.
                warn!(error = %err, "session fault");
                if attached {
                    attached = false;
                    print_event(&EventOutput::attached(false), format);
                }
                thread::sleep(DEFAULT_POLL_INTERVAL);
                continue;
            }
        };

        let mut outputs = Vec::new();
        if report.connected != attached {
            attached = report.connected;
            outputs.push(EventOutput::attached(attached));
        }
        let events = session.drain_events();
        if let Some(protocol) = session.protocol() {
            let tree = protocol.tree();
            outputs.extend(events.iter().map(|event| {
                let name = event_node(event)
                    .and_then(|ptr| tree.get_by_ptr(ptr))
                    .and_then(|id| tree.get(id))
                    .map(|node| names.translator().translate(node.name()).into_owned());
                EventOutput::from_tree_event(event).with_name(name)
            }));
        }

        for out in &outputs {
            print_event(out, format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                names.finish()?;
                return Ok(SUCCESS);
            }
        }

        thread::sleep(DEFAULT_POLL_INTERVAL);
    }

    names.finish()?;
    Ok(SUCCESS)
}

/// The node an event is about, if any.
fn event_node(event: &TreeEvent) -> Option<NodePtr> {
    match event {
        TreeEvent::RootIdentified { ptr }
        | TreeEvent::NodeValid { ptr }
        | TreeEvent::NodeInvalidated { ptr }
        | TreeEvent::NodeDeclared { ptr, .. } => Some(*ptr),
        TreeEvent::ControlUpdated { node, .. } => Some(*node),
        TreeEvent::TreeReset | TreeEvent::MessageBox { .. } | TreeEvent::ShellExecute { .. } => {
            None
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
