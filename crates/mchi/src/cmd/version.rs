use mchi_jor::{DEFAULT_REQUEST_TIMEOUT, OREF_MAGIC};
use mchi_transport::{TransportLayout, HIO2_REGION_SIZE, SESSION_MAGIC};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("mchi {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    for (key, value) in provenance() {
        println!("{key}: {value}");
    }
    Ok(SUCCESS)
}

/// Build details plus the wire constants this build speaks, so a report
/// from a user says which ring layout and tag set they were running.
fn provenance() -> Vec<(&'static str, String)> {
    let layout = TransportLayout::default();
    vec![
        ("name", "mchi".to_string()),
        ("version", env!("CARGO_PKG_VERSION").to_string()),
        (
            "target",
            option_env!("MCHI_BUILD_TARGET").unwrap_or("unknown").to_string(),
        ),
        ("rustc", option_env!("RUSTC_VERSION").unwrap_or("unknown").to_string()),
        ("git_hash", option_env!("GIT_HASH").unwrap_or("unknown").to_string()),
        ("session_magic", SESSION_MAGIC.to_string()),
        ("tree_protocol", OREF_MAGIC.to_string()),
        (
            "ring_layout",
            format!(
                "out={:#06x}+{:#x} in={:#06x}+{:#x}",
                layout.outbound.base, layout.outbound.size, layout.inbound.base, layout.inbound.size
            ),
        ),
        (
            "request_retry",
            format!("{}ms", DEFAULT_REQUEST_TIMEOUT.as_millis()),
        ),
        (
            "regions",
            format!("mmap={}, hio2={HIO2_REGION_SIZE:#x} bytes", cfg!(unix)),
        ),
    ]
}
