//! Command dispatch table.
//!
//! Every application command the machine understands maps to one
//! [`Handler`] variant with its parameter arity. [`Engine::dispatch`] is the
//! single place that turns a parsed [`Command`] into actions.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::Engine;
use super::phase::Phase;
use super::vision::{PHOTO_REQUEST, PhotoReply, parse_photo_reply};
use crate::command::Command;
use crate::controller::{ActuatorCommand, FieldController};
use crate::event;
use crate::peer::{PeerLink, VISION_PEER};
use crate::sensors::Sample;
use crate::types::Material;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    GetPhoto,
    GetDeviceInfo,
    DumpContainer,
    ContainerUnloaded,
    RestoreDevice,
    /// Forward straight to the field controller.
    Passthrough(ActuatorCommand),
    /// Acknowledged as `<name>_ack{status:"not_implemented"}`.
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub handler: Handler,
    pub requires_param: bool,
}

const fn entry(name: &'static str, handler: Handler, requires_param: bool) -> CommandSpec {
    CommandSpec {
        name,
        handler,
        requires_param,
    }
}

pub const COMMANDS: &[CommandSpec] = &[
    entry("get_photo", Handler::GetPhoto, false),
    entry("get_device_info", Handler::GetDeviceInfo, false),
    entry("dump_container", Handler::DumpContainer, true),
    entry("container_unloaded", Handler::ContainerUnloaded, true),
    entry("restore_device", Handler::RestoreDevice, false),
    entry(
        "cmd_full_clear_register",
        Handler::Passthrough(ActuatorCommand::ClearRegisters),
        false,
    ),
    entry(
        "cmd_force_move_carriage_left",
        Handler::Passthrough(ActuatorCommand::ForceMoveCarriageLeft),
        false,
    ),
    entry(
        "cmd_force_move_carriage_right",
        Handler::Passthrough(ActuatorCommand::ForceMoveCarriageRight),
        false,
    ),
    entry(
        "cmd_weight_error_reset",
        Handler::Passthrough(ActuatorCommand::ResetWeightError),
        false,
    ),
    entry(
        "cmd_reset_weight_reading",
        Handler::Passthrough(ActuatorCommand::ResetWeightReading),
        false,
    ),
    entry("enter_service_mode", Handler::Stub, false),
    entry("exit_service_mode", Handler::Stub, false),
    entry("unlock_door", Handler::Stub, false),
    entry("lock_door", Handler::Stub, false),
    entry("open_shutter", Handler::Stub, false),
    entry("close_shutter", Handler::Stub, false),
    entry("reboot_device", Handler::Stub, false),
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Handlers still honoured while the machine is in `ERROR`.
pub fn allowed_in_error(handler: Handler) -> bool {
    matches!(
        handler,
        Handler::GetPhoto | Handler::GetDeviceInfo | Handler::DumpContainer | Handler::RestoreDevice
    )
}

impl<C: FieldController, P: PeerLink> Engine<C, P> {
    /// Route one parsed command. Unknown names, missing parameters and,
    /// in `ERROR`, commands outside the recovery set are logged and dropped.
    pub(super) fn dispatch(&mut self, cmd: &Command, sample: &Sample, now: DateTime<Utc>) {
        let Some(name) = cmd.name() else {
            return;
        };
        let Some(spec) = lookup(name) else {
            tracing::debug!(command = name, "ignoring unknown command");
            return;
        };
        if matches!(self.ctx.phase, Phase::Error) && !allowed_in_error(spec.handler) {
            tracing::warn!(command = name, "command dropped in ERROR state");
            return;
        }
        let param = cmd.param();
        if spec.requires_param && param.is_none() {
            tracing::warn!(command = name, "command requires a parameter");
            return;
        }
        tracing::info!(
            command = name,
            param = ?param,
            state = %self.ctx.state(),
            "dispatching command"
        );

        match spec.handler {
            Handler::GetPhoto => self.get_photo(),
            Handler::GetDeviceInfo => self.device_info(sample),
            Handler::DumpContainer => {
                if let Some(material) = parse_material(name, param) {
                    self.dump_container(material, now);
                }
            }
            Handler::ContainerUnloaded => {
                if let Some(material) = parse_material(name, param) {
                    self.container_unloaded(material);
                }
            }
            Handler::RestoreDevice => self.restore_device(now),
            Handler::Passthrough(command) => self.actuate(command),
            Handler::Stub => {
                self.emitter.emit(
                    &format!("{name}_ack"),
                    json!({ "status": "not_implemented" }),
                );
            }
        }
    }

    fn dump_container(&mut self, material: Material, now: DateTime<Utc>) {
        let deadline = self.config.dump_deadline(now);
        self.transition(
            Phase::Dumping {
                material,
                started_at: now,
                deadline,
            },
            now,
        );
        self.actuate(match material {
            Material::Plastic => ActuatorCommand::ForceMoveCarriageLeft,
            Material::Aluminium => ActuatorCommand::ForceMoveCarriageRight,
        });
        self.emitter.emit(
            event::CONTAINER_DUMPED,
            json!({ "container_type": material.as_str() }),
        );
    }

    fn container_unloaded(&mut self, material: Material) {
        self.actuate(match material {
            Material::Plastic => ActuatorCommand::ResetBottleCounter,
            Material::Aluminium => ActuatorCommand::ResetCanCounter,
        });
        self.emitter.emit(
            event::CONTAINER_UNLOADED_ACK,
            json!({ "container_type": material.as_str() }),
        );
    }

    fn restore_device(&mut self, now: DateTime<Utc>) {
        self.ctx.curtain.consume();
        self.ctx.presence_latched = false;
        if !matches!(self.ctx.phase, Phase::Idle) {
            self.transition(Phase::Idle, now);
        }
        self.emitter
            .emit(event::RESTORE_DEVICE_ACK, json!({ "status": "ok" }));
    }

    fn device_info(&self, sample: &Sample) {
        let s = &sample.sensors;
        let c = &sample.counters;
        self.emitter.emit(
            event::DEVICE_INFO,
            json!({
                "bottle_count": c.bottle_count,
                "bank_count": c.can_count,
                "bottle_fill_percent": c.bottle_fill_percent,
                "bank_fill_percent": c.can_fill_percent,
                "state": self.ctx.state().as_str(),
                "left_sensor": s.left_limit,
                "center_sensor": s.center_limit,
                "right_sensor": s.right_limit,
                "weight_error": s.weight_error,
            }),
        );
    }

    /// Blocks the tick thread for at most the photo timeout.
    fn get_photo(&self) {
        let link = self.emitter.link();
        if link.take(VISION_PEER).is_some() {
            tracing::debug!("discarded stale vision message before photo request");
        }
        if !link.is_connected(VISION_PEER) {
            self.photo_failed("vision_unavailable");
            return;
        }
        link.send(VISION_PEER, PHOTO_REQUEST);

        let deadline = Instant::now() + self.config.photo_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(raw) = link.wait_take(VISION_PEER, remaining) else {
                break;
            };
            match parse_photo_reply(&raw) {
                Some(PhotoReply::Photo(fields)) => {
                    self.emitter.emit(event::PHOTO_READY, Value::Object(fields));
                    return;
                }
                Some(PhotoReply::Failed(error)) => {
                    self.photo_failed(&error);
                    return;
                }
                None => tracing::debug!(message = %raw, "ignoring non-photo vision message"),
            }
        }
        tracing::warn!(
            timeout_ms = self.config.photo_timeout_ms,
            "photo request timed out"
        );
        self.photo_failed("timeout");
    }

    fn photo_failed(&self, error: &str) {
        self.emitter
            .emit(event::PHOTO_READY, json!({ "error": error }));
    }
}

fn parse_material(command: &str, param: Option<&str>) -> Option<Material> {
    let raw = param?;
    match raw.parse::<Material>() {
        Ok(material) => Some(material),
        Err(e) => {
            tracing::warn!(command, error = %e, "invalid container type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = COMMANDS.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), COMMANDS.len());
    }

    #[test]
    fn only_material_commands_take_a_parameter() {
        for spec in COMMANDS {
            let expected = matches!(
                spec.handler,
                Handler::DumpContainer | Handler::ContainerUnloaded
            );
            assert_eq!(spec.requires_param, expected, "{}", spec.name);
        }
    }

    #[test]
    fn passthroughs_map_to_actuators() {
        assert_eq!(
            lookup("cmd_force_move_carriage_right").map(|s| s.handler),
            Some(Handler::Passthrough(
                ActuatorCommand::ForceMoveCarriageRight
            ))
        );
        assert_eq!(
            lookup("cmd_full_clear_register").map(|s| s.handler),
            Some(Handler::Passthrough(ActuatorCommand::ClearRegisters))
        );
        assert!(lookup("format_disk").is_none());
    }

    #[test]
    fn error_state_recovery_set() {
        let honoured: Vec<_> = COMMANDS
            .iter()
            .filter(|s| allowed_in_error(s.handler))
            .map(|s| s.name)
            .collect();
        assert_eq!(
            honoured,
            vec!["get_photo", "get_device_info", "dump_container", "restore_device"]
        );
    }
}
