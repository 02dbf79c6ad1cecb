//! `tether release`: tear down a tunnel recorded by a run that did not
//! clean up after itself.

use crate::output::OutputContext;
use crate::tunnel::{SystemPorts, release_recorded};
use tether_common::config::TetherConfig;

pub fn release(config: &TetherConfig, port: Option<u16>, ctx: &OutputContext) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.tunnel.local_port);
    let state_dir = config.tunnel.state_dir();
    if release_recorded(&state_dir, port, &SystemPorts)? {
        ctx.success(&format!("Released tunnel on port {port}"));
    } else {
        ctx.info(&format!("No tunnel recorded for port {port} in {}", state_dir.display()));
    }
    Ok(())
}
