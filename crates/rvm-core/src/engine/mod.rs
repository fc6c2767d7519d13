//! State Machine Engine.
//!
//! One [`Engine::tick_at`] call is one pass of the machine. Within a tick the
//! order is fixed: dump-deadline checks, vision-deadline checks, IDLE/ERROR
//! command processing, then the hardware edge watch. The watch runs last so
//! its events reflect the freshest sample whatever branch ran.

pub mod dispatch;
pub mod phase;
pub mod vision;
pub mod watch;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::command::parse_command;
use crate::controller::{ActuatorCommand, FieldController};
use crate::event::{self, EventEmitter};
use crate::peer::{APP_PEER, PeerLink, VISION_PEER};
use crate::sensors::{Sample, SharedSample};
use crate::types::{ContainerKind, MachineState, Material, kind_or_none};

pub use phase::{MachineContext, Phase, StatusHandle, StatusView};
use vision::{Resolution, UNTYPED_REQUEST, parse_reply, resolve};
use watch::HardwareEdge;

// ─── Configuration ────────────────────────────────────────────────

/// What starts a detection cycle in IDLE.
///
/// With `CurtainOrPresence` a curtain that clears before the controller has
/// raised a presence flag starts an untyped cycle (`plc_type: "none"`). That
/// cycle cannot confirm: it ends in a type mismatch or a vision timeout, and
/// the container's real cycle starts only afterwards. `CurtainAndPresence`
/// avoids this at the cost of missing containers whose presence flag never
/// rises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionPolicy {
    /// Curtain just cleared and a container-present flag is set.
    CurtainAndPresence,
    /// Either the curtain just cleared or a new presence flag appeared.
    #[default]
    CurtainOrPresence,
}

impl DetectionPolicy {
    pub fn triggers(self, curtain_cleared: bool, fresh_presence: bool) -> bool {
        match self {
            Self::CurtainAndPresence => curtain_cleared && fresh_presence,
            Self::CurtainOrPresence => curtain_cleared || fresh_presence,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurtainAndPresence => "curtain-and-presence",
            Self::CurtainOrPresence => "curtain-or-presence",
        }
    }
}

impl fmt::Display for DetectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "curtain-and-presence" | "and" => Ok(Self::CurtainAndPresence),
            "curtain-or-presence" | "or" => Ok(Self::CurtainOrPresence),
            other => Err(format!("unknown detection policy: {other}")),
        }
    }
}

/// Upper bound for every timeout knob: one day.
pub const MAX_TIMEOUT_MS: u64 = 86_400_000;

const DEFAULT_VISION_TIMEOUT_MS: u64 = 2000;
const DEFAULT_DUMP_TIMEOUT_MS: u64 = 3000;
const DEFAULT_PHOTO_TIMEOUT_MS: u64 = 2000;

/// Timeouts outside `1..=MAX_TIMEOUT_MS` fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub vision_timeout_ms: u64,
    pub dump_timeout_ms: u64,
    pub photo_timeout_ms: u64,
    pub detection_policy: DetectionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            vision_timeout_ms: DEFAULT_VISION_TIMEOUT_MS,
            dump_timeout_ms: DEFAULT_DUMP_TIMEOUT_MS,
            photo_timeout_ms: DEFAULT_PHOTO_TIMEOUT_MS,
            detection_policy: DetectionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn photo_timeout(&self) -> Duration {
        Duration::from_millis(bounded_ms(
            "photo_timeout_ms",
            self.photo_timeout_ms,
            DEFAULT_PHOTO_TIMEOUT_MS,
        ))
    }

    pub fn vision_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        deadline_after(
            now,
            bounded_ms(
                "vision_timeout_ms",
                self.vision_timeout_ms,
                DEFAULT_VISION_TIMEOUT_MS,
            ),
        )
    }

    pub fn dump_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        deadline_after(
            now,
            bounded_ms(
                "dump_timeout_ms",
                self.dump_timeout_ms,
                DEFAULT_DUMP_TIMEOUT_MS,
            ),
        )
    }
}

fn bounded_ms(knob: &'static str, ms: u64, fallback: u64) -> u64 {
    if (1..=MAX_TIMEOUT_MS).contains(&ms) {
        ms
    } else {
        tracing::warn!(knob, value = ms, fallback, "timeout out of range, using default");
        fallback
    }
}

fn deadline_after(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── Engine ───────────────────────────────────────────────────────

/// Owns the machine context. Driven by exactly one thread.
pub struct Engine<C: FieldController, P: PeerLink> {
    controller: C,
    emitter: EventEmitter<P>,
    sample: SharedSample,
    config: EngineConfig,
    ctx: MachineContext,
    status: StatusHandle,
}

impl<C: FieldController, P: PeerLink> Engine<C, P> {
    pub fn new(controller: C, link: P, sample: SharedSample, config: EngineConfig) -> Self {
        Self::starting_at(controller, link, sample, config, Utc::now())
    }

    /// Construct with an explicit start time (tests drive their own clock).
    pub fn starting_at(
        controller: C,
        link: P,
        sample: SharedSample,
        config: EngineConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let ctx = MachineContext::new(now);
        let status = StatusHandle::new(StatusView {
            state: ctx.state(),
            since: now,
        });
        Self {
            controller,
            emitter: EventEmitter::new(link),
            sample,
            config,
            ctx,
            status,
        }
    }

    pub fn state(&self) -> MachineState {
        self.ctx.state()
    }

    pub fn phase(&self) -> &Phase {
        &self.ctx.phase
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn link(&self) -> &P {
        self.emitter.link()
    }

    /// Cloneable reader for other threads.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn tick(&mut self) -> MachineState {
        self.tick_at(Utc::now())
    }

    /// Run one pass of the machine against the latest sample.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> MachineState {
        let sample = self.sample.load();

        self.check_dumping(&sample, now);
        self.check_vision(now);
        match self.ctx.phase {
            Phase::Idle => self.process_idle(&sample, now),
            Phase::Error => self.process_error(&sample, now),
            Phase::WaitingVision { .. } | Phase::Dumping { .. } => {}
        }
        self.watch_hardware(&sample);

        self.ctx.state()
    }

    // ─── State handlers ───────────────────────────────────────────

    fn check_dumping(&mut self, sample: &Sample, now: DateTime<Utc>) {
        let Phase::Dumping {
            material,
            started_at,
            deadline,
        } = self.ctx.phase
        else {
            return;
        };

        // A limit reading only counts if it was polled after the move began.
        let fresh = sample.sampled_at.is_some_and(|at| at >= started_at);
        let at_limit = match material {
            Material::Plastic => sample.sensors.left_limit,
            Material::Aluminium => sample.sensors.right_limit,
        };

        if fresh && at_limit {
            self.actuate(ActuatorCommand::ClearRegisters);
            let counter = match material {
                Material::Plastic => sample.counters.bottle_count,
                Material::Aluminium => sample.counters.can_count,
            };
            self.emitter.emit(
                event::CONTAINER_ACCEPTED,
                json!({ "type": material.accepted_label(), "counter": counter }),
            );
            self.transition(Phase::Idle, now);
        } else if now > deadline {
            let error_code = match material {
                Material::Plastic => "carriage_left_timeout",
                Material::Aluminium => "carriage_right_timeout",
            };
            tracing::warn!(error_code, material = %material, "carriage did not reach its limit");
            self.actuate(ActuatorCommand::ClearRegisters);
            self.emitter.emit(
                event::HARDWARE_ERROR,
                json!({
                    "error_code": error_code,
                    "message": format!("carriage did not reach the {material} limit in time"),
                }),
            );
            self.transition(Phase::Error, now);
        }
    }

    fn check_vision(&mut self, now: DateTime<Utc>) {
        let Phase::WaitingVision { memo, deadline } = self.ctx.phase else {
            return;
        };

        if now >= deadline {
            tracing::info!(plc_type = kind_or_none(memo), "vision reply timed out");
            self.emitter.emit(event::CONTAINER_NOT_RECOGNIZED, json!({}));
            self.transition(Phase::Idle, now);
            return;
        }

        let Some(raw) = self.emitter.link().take(VISION_PEER) else {
            return;
        };
        let Some(reply) = parse_reply(&raw) else {
            tracing::debug!(message = %raw, "ignoring unexpected vision message");
            return;
        };

        match resolve(memo, reply.verdict) {
            Resolution::NotRecognized => {
                self.emitter.emit(event::CONTAINER_NOT_RECOGNIZED, json!({}));
            }
            Resolution::Recognized { kind, confirm } => {
                self.actuate(confirm);
                self.emitter.emit(
                    event::CONTAINER_RECOGNIZED,
                    json!({ "type": kind.as_str(), "confidence": reply.confidence }),
                );
            }
            Resolution::Mismatch {
                detected,
                classified,
            } => {
                tracing::warn!(
                    plc_type = kind_or_none(detected),
                    vision_type = %classified,
                    "detector and classifier disagree"
                );
                self.emitter.emit(
                    event::RECEIVER_NOT_EMPTY,
                    json!({
                        "reason": "type_mismatch",
                        "plc_type": kind_or_none(detected),
                        "vision_type": classified.as_str(),
                    }),
                );
            }
        }
        self.transition(Phase::Idle, now);
    }

    fn process_idle(&mut self, sample: &Sample, now: DateTime<Utc>) {
        let sensors = &sample.sensors;
        self.ctx.curtain.observe(sensors.curtain);

        let present = if sensors.bottle_present {
            Some(ContainerKind::Bottle)
        } else if sensors.can_present {
            Some(ContainerKind::Can)
        } else {
            None
        };
        if present.is_none() {
            self.ctx.presence_latched = false;
        }
        let fresh_presence = present.is_some() && !self.ctx.presence_latched;

        if self
            .config
            .detection_policy
            .triggers(self.ctx.curtain.just_cleared(), fresh_presence)
        {
            self.start_detection(present, now);
            return;
        }

        if let Some(raw) = self.emitter.link().take(APP_PEER) {
            let cmd = parse_command(&raw);
            self.dispatch(&cmd, sample, now);
        }
    }

    fn start_detection(&mut self, memo: Option<ContainerKind>, now: DateTime<Utc>) {
        self.ctx.curtain.consume();
        self.ctx.presence_latched = memo.is_some();

        self.emitter.emit(
            event::CONTAINER_DETECTED,
            json!({ "plc_type": kind_or_none(memo) }),
        );

        let link = self.emitter.link();
        if let Some(stale) = link.take(VISION_PEER) {
            tracing::debug!(message = %stale, "discarded stale vision reply");
        }
        link.send(
            VISION_PEER,
            memo.map_or(UNTYPED_REQUEST, ContainerKind::vision_request),
        );

        let deadline = self.config.vision_deadline(now);
        self.transition(Phase::WaitingVision { memo, deadline }, now);
    }

    fn process_error(&mut self, sample: &Sample, now: DateTime<Utc>) {
        if let Some(raw) = self.emitter.link().take(APP_PEER) {
            let cmd = parse_command(&raw);
            self.dispatch(&cmd, sample, now);
        }
    }

    fn watch_hardware(&mut self, sample: &Sample) {
        let sensors = &sample.sensors;
        for edge in self.ctx.watch.observe(sensors) {
            match edge {
                HardwareEdge::FaultRaised(fault) => {
                    tracing::warn!(error_code = fault.code(), "hardware fault raised");
                    self.emitter.emit(
                        event::HARDWARE_ERROR,
                        json!({ "error_code": fault.code(), "message": fault.message() }),
                    );
                }
                HardwareEdge::FaultCleared(fault) => {
                    tracing::info!(error_code = fault.code(), "hardware fault cleared");
                }
                HardwareEdge::ReceiverOccupied => {
                    self.emitter.emit(
                        event::RECEIVER_NOT_EMPTY,
                        json!({
                            "reason": "occupied",
                            "weight_too_small": sensors.weight_too_small,
                            "bottle_weight_ok": sensors.bottle_weight_ok,
                            "can_weight_ok": sensors.can_weight_ok,
                        }),
                    );
                }
                HardwareEdge::ReceiverEmptied => {
                    self.emitter.emit(event::RECEIVER_EMPTY, Value::Null);
                }
            }
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────

    fn transition(&mut self, next: Phase, now: DateTime<Utc>) {
        let from = self.ctx.state();
        self.ctx.phase = next;
        self.ctx.entered_at = now;
        let to = self.ctx.state();
        if from != to {
            tracing::info!(from = %from, to = %to, "state transition");
        }
        self.status.publish(StatusView {
            state: to,
            since: now,
        });
    }

    /// Actuator failures are logged, never propagated out of the tick.
    fn actuate(&self, command: ActuatorCommand) {
        if let Err(e) = self.controller.apply(command) {
            tracing::warn!(command = ?command, error = %e, "actuator command failed");
        }
    }
}
