use std::collections::BTreeMap;
use std::fmt::Write;

use crate::input::topology::{BlockIdx, TerritoryId, TrackTopology};
use crate::railway::Fault;
use crate::railway::movement::TrainId;
use crate::railway::wayside::ProgramState;

/// Everything that happened during a run, timestamped in simulation
/// seconds.
#[derive(Debug, Default)]
pub struct History {
    pub track: Vec<(f64, TrackLogEvent)>,
    pub trains: BTreeMap<TrainId, TrainHistory>,
}

#[derive(Debug, Default)]
pub struct TrainHistory {
    pub name: String,
    pub events: Vec<(f64, TrainLogEvent)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackLogEvent {
    Occupied(BlockIdx, bool),
    Switch(BlockIdx, bool),
    /// Switch move refused by the clamp interlock.
    SwitchHeld(BlockIdx, bool),
    Light(BlockIdx, bool),
    Crossing(BlockIdx, bool),
    Clamp(BlockIdx, bool),
    Program(TerritoryId, ProgramState),
    Fault(Fault),
    /// Operator or dispatch command that could not be carried out.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainLogEvent {
    Spawn(BlockIdx),
    Enter(BlockIdx),
    Beacon(BlockIdx, String),
    Hold(BlockIdx),
    Authority(f64),
    Speed(f64),
    EmergencyStop,
    Despawn(BlockIdx),
}

impl History {
    pub fn track_event(&mut self, time: f64, ev: TrackLogEvent) {
        self.track.push((time, ev));
    }

    pub fn train_event(&mut self, time: f64, train: TrainId, name: &str, ev: TrainLogEvent) {
        let h = self.trains.entry(train).or_insert_with(|| TrainHistory {
            name: name.to_string(),
            events: Vec::new(),
        });
        h.events.push((time, ev));
    }

    pub fn faults(&self) -> impl Iterator<Item = (f64, &Fault)> {
        self.track.iter().filter_map(|&(t, ref ev)| match *ev {
            TrackLogEvent::Fault(ref f) => Some((t, f)),
            _ => None,
        })
    }
}

/// Print one block visit per line on the following format:
/// `trainname time blockname`.
pub fn visits(topology: &TrackTopology, h: &History) -> Result<String, failure::Error> {
    let mut s = String::new();
    for train in h.trains.values() {
        for &(t, ref ev) in &train.events {
            match *ev {
                TrainLogEvent::Spawn(b) | TrainLogEvent::Enter(b) => {
                    writeln!(s, "{} {} {}", train.name, t, topology.name(b))?;
                }
                _ => {}
            }
        }
    }
    Ok(s)
}
