//! `hitline roster`: classified device list.

use std::sync::Arc;

use hitline_core::types::Device;
use hitline_session::{SystemClock, refresh_roster};

use crate::cli::RosterOpts;
use crate::sim::SimulatedFleet;

pub async fn cmd_roster(opts: RosterOpts) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let fleet = SimulatedFleet::new(opts.fleet.spec(), clock.clone());
    let devices = refresh_roster(&fleet, clock.as_ref()).await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print!("{}", format_roster(&devices));
    }
    Ok(())
}

fn format_roster(devices: &[Device]) -> String {
    let width = devices
        .iter()
        .map(|d| d.device_id.len())
        .max()
        .unwrap_or(0);
    devices
        .iter()
        .map(|d| {
            let status = d.status.as_str();
            format!("{:<width$}  {status:<7}  {}\n", d.device_id, d.display_name)
        })
        .collect()
}
