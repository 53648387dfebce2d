use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};
use mchi_jor::{
    NodeId, NodePtr, NodeStatus, NodeTree, Passthrough, Session, SessionConfig, StringDictionary,
    Translate, UNSET_NODE_PTR,
};
use mchi_transport::ring::DEFAULT_POLL_INTERVAL;
use mchi_transport::{Hio2Region, SharedRegion};
use tracing::info;

use crate::exit::{jor_error, transport_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod set;
pub mod status;
pub mod tree;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print both rings' magic, readiness and cursors.
    Status(StatusArgs),
    /// Fetch the target's object tree and print it.
    Tree(TreeArgs),
    /// Follow tree changes as the target reports them.
    Watch(WatchArgs),
    /// Change one control's value.
    Set(SetArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Status(args) => status::run(args, format),
        Command::Tree(args) => tree::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Set(args) => set::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the target's shared region lives.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Shared memory file exported by the emulator.
    #[arg(
        value_name = "MAPPING",
        env = "MCHI_MAPPING",
        required_unless_present = "hio2",
        conflicts_with = "hio2"
    )]
    pub mapping: Option<PathBuf>,
    /// Serve the legacy UDP mirror on this address instead (e.g. 0.0.0.0:1234).
    #[arg(long, value_name = "ADDR", env = "MCHI_HIO2_BIND")]
    pub hio2: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// How long to wait for a UDP mirror peer (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct TreeArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Print only the subtree under this node pointer.
    #[arg(long, value_name = "PTR", value_parser = parse_ptr)]
    pub node: Option<NodePtr>,
    /// Levels below the starting node to print.
    #[arg(long)]
    pub depth: Option<usize>,
    /// JSON file translating node and control names.
    #[arg(long, value_name = "FILE")]
    pub dictionary: Option<PathBuf>,
    /// Give up on nodes that have not answered after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// JSON file translating node and control names.
    #[arg(long, value_name = "FILE")]
    pub dictionary: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Pointer of the node owning the control (hex with 0x prefix, or decimal).
    #[arg(long, value_name = "PTR", value_parser = parse_ptr)]
    pub node: NodePtr,
    /// Control id within the node.
    #[arg(long, value_name = "ID")]
    pub control: u32,
    /// New value. Check boxes take true/false, selectors an item index or
    /// name. Omit for buttons.
    #[arg(long)]
    pub value: Option<String>,
    /// How long to wait for the node to be fetched (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open the region named on the command line.
pub fn open_region(target: &TargetArgs) -> CliResult<(Box<dyn SharedRegion>, String)> {
    if let Some(addr) = target.hio2 {
        let region = Hio2Region::bind(addr).map_err(|err| transport_error("bind failed", err))?;
        let local = region
            .local_addr()
            .map_err(|err| transport_error("bind failed", err))?;
        info!(%local, "waiting for target handshake");
        return Ok((Box::new(region), format!("udp://{local}")));
    }

    let Some(path) = target.mapping.as_deref() else {
        return Err(CliError::usage("a mapping file or --hio2 address is required"));
    };
    open_mapping(path)
}

#[cfg(unix)]
fn open_mapping(path: &Path) -> CliResult<(Box<dyn SharedRegion>, String)> {
    let region = mchi_transport::MappedRegion::open(path)
        .map_err(|err| transport_error("open failed", err))?;
    Ok((Box::new(region), path.display().to_string()))
}

#[cfg(not(unix))]
fn open_mapping(path: &Path) -> CliResult<(Box<dyn SharedRegion>, String)> {
    Err(CliError::usage(format!(
        "cannot map {}: mapped regions need a unix host, use --hio2",
        path.display()
    )))
}

pub fn open_session(target: &TargetArgs) -> CliResult<Session<Box<dyn SharedRegion>>> {
    let (region, source) = open_region(target)?;
    let session = Session::new(region, SessionConfig::default())
        .map_err(|err| jor_error("session setup failed", err))?;
    info!(%source, "session opened");
    Ok(session)
}

/// Pump until `done` holds or `timeout` passes. Returns whether `done` held.
pub fn pump_until<R: SharedRegion>(
    session: &mut Session<R>,
    timeout: Duration,
    mut done: impl FnMut(&Session<R>) -> bool,
) -> CliResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        session
            .pump()
            .map_err(|err| jor_error("session failed", err))?;
        if done(session) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(DEFAULT_POLL_INTERVAL);
    }
}

/// Whether the root is identified and every node under `start` has
/// answered.
pub fn is_settled(tree: &NodeTree, start: NodeId) -> bool {
    let root_known = tree
        .get(tree.root())
        .is_some_and(|r| r.ptr() != UNSET_NODE_PTR);
    root_known
        && tree
            .depth_first_from(start)
            .into_iter()
            .all(|id| tree.get(id).is_some_and(|n| n.status() == NodeStatus::Valid))
}

/// Name translation chosen on the command line.
pub enum NameTable {
    Passthrough(Passthrough),
    Dictionary(StringDictionary),
}

impl NameTable {
    pub fn open(path: Option<&Path>) -> CliResult<Self> {
        match path {
            None => Ok(Self::Passthrough(Passthrough)),
            Some(path) => StringDictionary::open(path)
                .map(Self::Dictionary)
                .map_err(|err| jor_error("dictionary load failed", err)),
        }
    }

    pub fn translator(&self) -> &dyn Translate {
        match self {
            Self::Passthrough(p) => p,
            Self::Dictionary(d) => d,
        }
    }

    /// Write back names seen without a translation.
    pub fn finish(&self) -> CliResult<()> {
        match self {
            Self::Dictionary(d) if d.is_dirty() => d
                .save()
                .map_err(|err| jor_error("dictionary save failed", err)),
            _ => Ok(()),
        }
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse a node pointer given as `0x`-prefixed hex or decimal.
pub fn parse_ptr(input: &str) -> Result<NodePtr, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid node pointer: {input}"))
}
