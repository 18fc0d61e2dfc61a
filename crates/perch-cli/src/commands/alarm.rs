//! `perch alarm` — write and inspect the local monitoring feed.

use perch_core::error::{DeployError, DeployResult};
use perch_core::types::AlarmState;

use super::{Context, store_err};

pub fn set(ctx: &Context, name: &str, state: &str) -> DeployResult<()> {
    let state: AlarmState = state.parse().map_err(DeployError::Setup)?;
    ctx.store.set_alarm(name, state).map_err(store_err)?;
    println!("{name} = {state}");
    Ok(())
}

pub fn list(ctx: &Context) -> DeployResult<()> {
    let alarms = ctx.store.list_alarms().map_err(store_err)?;
    if alarms.is_empty() {
        println!("no alarm states recorded");
        return Ok(());
    }
    for (name, status) in alarms {
        println!("{name}  {}  (as of {})", status.state, status.timestamp);
    }
    Ok(())
}
