use mchi_transport::{
    ChannelConfig, Magic, RingGeometry, SharedRegion, Transport, TransportLayout,
};

use crate::cmd::{open_region, parse_duration, StatusArgs};
use crate::exit::{transport_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_status, OutputFormat, RingView, StatusOutput};

pub fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let (region, source) = open_region(&args.target)?;

    if args.target.hio2.is_some() {
        wait_for_peer(region.as_ref(), timeout)?;
    }

    let transport = Transport::new(region, TransportLayout::default(), ChannelConfig::default())
        .map_err(|err| transport_error("region too small", err))?;
    let status = transport
        .status()
        .map_err(|err| transport_error("status failed", err))?;
    let layout = transport.layout();
    let region = transport.region();

    let out = StatusOutput {
        source,
        attached: region.is_attached(),
        ready: transport.is_ready(),
        outbound: RingView::new(
            layout.outbound,
            ring_magic(region.as_ref(), layout.outbound)?,
            status.outbound,
        ),
        inbound: RingView::new(
            layout.inbound,
            ring_magic(region.as_ref(), layout.inbound)?,
            status.inbound,
        ),
    };
    print_status(&out, format);

    Ok(if out.ready { SUCCESS } else { FAILURE })
}

fn ring_magic(region: &dyn SharedRegion, geometry: RingGeometry) -> CliResult<Magic> {
    let mut bytes = [0u8; 4];
    region
        .read_bytes(geometry.base, &mut bytes)
        .map_err(|err| transport_error("status failed", err))?;
    Ok(Magic::new(bytes))
}

fn wait_for_peer(region: &dyn SharedRegion, timeout: std::time::Duration) -> CliResult<()> {
    let start = std::time::Instant::now();
    while !region.is_attached() {
        if start.elapsed() >= timeout {
            return Err(CliError::timeout(format!(
                "no target handshake within {timeout:?}"
            )));
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    Ok(())
}
