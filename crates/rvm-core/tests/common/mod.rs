#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rvm_core::engine::vision::PHOTO_REQUEST;
use rvm_core::{
    APP_PEER, Engine, EngineConfig, FieldController, MachineState, PeerLink, SharedSample,
    SimulatedController, VISION_PEER,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Peer link with single-slot inboxes that records everything sent.
#[derive(Default)]
pub struct Recorder {
    inbox: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<(String, String)>>,
    absent: Mutex<HashSet<String>>,
    photo_reply: Mutex<Option<String>>,
}

impl Recorder {
    pub fn deliver(&self, peer: &str, message: &str) {
        self.inbox
            .lock()
            .unwrap()
            .insert(peer.to_owned(), message.to_owned());
    }

    pub fn disconnect(&self, peer: &str) {
        self.absent.lock().unwrap().insert(peer.to_owned());
        self.inbox.lock().unwrap().remove(peer);
    }

    /// Vision answers the next photo request with `reply`.
    pub fn answer_photo_with(&self, reply: &str) {
        *self.photo_reply.lock().unwrap() = Some(reply.to_owned());
    }

    pub fn sent_to(&self, peer: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl PeerLink for Recorder {
    fn take(&self, peer: &str) -> Option<String> {
        self.inbox.lock().unwrap().remove(peer)
    }

    fn wait_take(&self, peer: &str, _timeout: Duration) -> Option<String> {
        self.take(peer)
    }

    fn send(&self, peer: &str, message: &str) {
        if !self.is_connected(peer) {
            return;
        }
        self.sent
            .lock()
            .unwrap()
            .push((peer.to_owned(), message.to_owned()));
        if peer == VISION_PEER && message == PHOTO_REQUEST {
            if let Some(reply) = self.photo_reply.lock().unwrap().take() {
                self.deliver(VISION_PEER, &reply);
            }
        }
    }

    fn is_connected(&self, peer: &str) -> bool {
        !self.absent.lock().unwrap().contains(peer)
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
}

/// Engine + simulated controller + recorder on a hand-driven clock.
/// Each `tick` polls the simulator first, stamping the sample with the
/// harness clock, the way the polling loop would.
pub struct Harness {
    pub engine: Engine<SimulatedController, Arc<Recorder>>,
    pub sim: SimulatedController,
    pub shared: SharedSample,
    pub link: Arc<Recorder>,
    pub now: DateTime<Utc>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let sim = SimulatedController::new().with_recording();
        let shared = SharedSample::new();
        let link = Arc::new(Recorder::default());
        let engine = Engine::starting_at(sim.clone(), link.clone(), shared.clone(), config, t0());
        Self {
            engine,
            sim,
            shared,
            link,
            now: t0(),
        }
    }

    pub fn tick(&mut self) -> MachineState {
        if let Ok(mut sample) = self.sim.sample() {
            sample.sampled_at = Some(self.now);
            self.shared.store(sample);
        }
        self.engine.tick_at(self.now)
    }

    pub fn advance_ms(&mut self, ms: i64) {
        self.now += TimeDelta::milliseconds(ms);
    }

    /// Advance the clock, then tick.
    pub fn step(&mut self, ms: i64) -> MachineState {
        self.advance_ms(ms);
        self.tick()
    }

    pub fn app(&self, message: &str) {
        self.link.deliver(APP_PEER, message);
    }

    pub fn vision(&self, message: &str) {
        self.link.deliver(VISION_PEER, message);
    }

    /// Every event sent to the application peer, parsed.
    pub fn events(&self) -> Vec<Value> {
        self.link
            .sent_to(APP_PEER)
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e["event"].as_str().unwrap().to_owned())
            .collect()
    }

    /// `data` of every event with the given name.
    pub fn named(&self, name: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e["event"] == name)
            .map(|e| e["data"].clone())
            .collect()
    }

    pub fn vision_requests(&self) -> Vec<String> {
        self.link.sent_to(VISION_PEER)
    }
}
