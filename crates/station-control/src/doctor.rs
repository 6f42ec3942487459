use anyhow::Result;

use crate::actuator::{ActuatorConfig, MAX_ACTUATORS};
use crate::bindings::{Control, KeyBindingTable};
use crate::mixer::ThrusterConfig;

pub fn check_thrusters(cfg: &ThrusterConfig) -> Result<()> {
    if let Some(slot) = cfg.duplicate_slot() {
        anyhow::bail!("thrusters: slot {slot} assigned to more than one channel");
    }
    anyhow::ensure!(cfg.channels.iter().any(|c| c.slot.is_some()), "thrusters: no channel has a slot");
    Ok(())
}

pub fn check_bindings(table: &KeyBindingTable, actuators: &ActuatorConfig) -> Result<()> {
    if let Some(b) = table.duplicate() {
        anyhow::bail!("keybindings: {} bound to more than one control", b.token());
    }
    for (c, _) in table.iter() {
        if let Control::Actuator(i) = c {
            anyhow::ensure!(i < actuators.len(), "keybindings: {} has no matching actuator", c.tag());
        }
    }
    Ok(())
}

pub fn check_actuators(cfg: &ActuatorConfig) -> Result<()> {
    anyhow::ensure!(cfg.len() <= MAX_ACTUATORS, "actuators: at most {MAX_ACTUATORS} supported");
    for (i, a) in cfg.actuators.iter().enumerate() {
        anyhow::ensure!(!a.name.trim().is_empty(), "actuators: #{i} has an empty name");
    }
    Ok(())
}
