//! The track world driven by the event loop: a movement tick for all
//! trains and one scan process per wayside controller.

use failure::Fail;
use log::{debug, error, info, warn};

use std::collections::BTreeMap;

use crate::config::SimConfig;
use crate::eventsim::{Process, Simulation};
use crate::input::topology::*;
use crate::output::history::{History, TrackLogEvent, TrainLogEvent};
use super::Fault;
use super::authority::{Authority, AuthorityCalculator, AuthorityError};
use super::bus::{OccupancyMessage, SuggestionBoard, WaysideOutputMessage};
use super::movement::{MovementFault, MovementReport, TrainId, TrainMovementSimulator};
use super::state::DynamicTrackState;
use super::wayside::{LogicLoadError, OperatorError, OverrideField, WaysideController};

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum CommandError {
    #[fail(display = "unknown train \"{}\"", _0)]
    UnknownTrain(String),
    #[fail(display = "train \"{}\" already exists", _0)]
    DuplicateTrain(String),
    #[fail(display = "no wayside controller for territory {}", _0)]
    UnknownTerritory(TerritoryId),
    #[fail(display = "{}", _0)]
    Topology(#[cause] TopologyError),
    #[fail(display = "{}", _0)]
    Operator(#[cause] OperatorError),
    #[fail(display = "{}", _0)]
    Fault(#[cause] Fault),
}

impl From<TopologyError> for CommandError {
    fn from(e: TopologyError) -> CommandError { CommandError::Topology(e) }
}

impl From<OperatorError> for CommandError {
    fn from(e: OperatorError) -> CommandError { CommandError::Operator(e) }
}

impl From<LogicLoadError> for CommandError {
    fn from(e: LogicLoadError) -> CommandError { CommandError::Fault(Fault::Load(e)) }
}

impl From<AuthorityError> for CommandError {
    fn from(e: AuthorityError) -> CommandError { CommandError::Fault(Fault::Authority(e)) }
}

/// Stand-in for the train's own speed controller: runs at a target speed,
/// capped by the block speed limit, the suggested speed and the remaining
/// authority.
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub target_speed: f64,
    pub suggested_speed: Option<f64>,
    /// Distance left before the train must stop; `None` is unrestricted.
    pub authority: Option<Dist>,
    pub held: bool,
    pub stopped: bool,
}

impl Driver {
    pub fn new(target_speed: f64) -> Driver {
        Driver { target_speed, suggested_speed: None, authority: None, held: false, stopped: false }
    }

    /// Distance the driver asks to cover in `dt`.
    fn step_distance(&self, speed_limit: f64, dt: f64) -> Dist {
        if self.stopped {
            return 0.0;
        }
        let mut speed = self.target_speed.min(speed_limit);
        if let Some(s) = self.suggested_speed {
            speed = speed.min(s);
        }
        let dx = speed.max(0.0) * dt;
        match self.authority {
            Some(left) => dx.min(left.max(0.0)),
            None => dx,
        }
    }

    /// Uses up authority for the distance the train actually moved.
    fn consume(&mut self, moved: Dist) {
        if let Some(ref mut left) = self.authority {
            *left = (*left - moved).max(0.0);
        }
    }
}

/// Distance covered by a movement step that started `before` into its block.
fn distance_moved(topology: &TrackTopology, before: Dist, report: &MovementReport) -> Dist {
    let passed: Dist = report.vacated.iter()
        .filter_map(|b| topology.block_at(*b).ok())
        .map(|b| b.length)
        .sum();
    (passed + report.remaining - before).max(0.0)
}

pub struct TrackWorld {
    pub topology: TrackTopology,
    pub state: DynamicTrackState,
    pub controllers: Vec<WaysideController>,
    pub movement: TrainMovementSimulator,
    pub board: SuggestionBoard,
    pub drivers: BTreeMap<TrainId, Driver>,
    pub history: History,
    pub config: SimConfig,
    last_occupancy: OccupancyMessage,
}

impl TrackWorld {
    /// Creates one wayside controller per territory of the topology.
    pub fn new(topology: TrackTopology, config: SimConfig) -> Result<TrackWorld, TopologyError> {
        let state = DynamicTrackState::new(&topology);
        let controllers = topology.territories().into_iter()
            .map(|t| WaysideController::new(&topology, t))
            .collect::<Result<Vec<_>, _>>()?;
        let board = SuggestionBoard::new(&topology);
        let last_occupancy = OccupancyMessage::snapshot(&topology, &state);
        Ok(TrackWorld {
            topology,
            state,
            controllers,
            movement: TrainMovementSimulator::new(),
            board,
            drivers: BTreeMap::new(),
            history: History::default(),
            config,
            last_occupancy,
        })
    }

    pub fn controller(&self, territory: TerritoryId) -> Result<&WaysideController, CommandError> {
        self.controllers.iter().find(|c| c.territory() == territory)
            .ok_or(CommandError::UnknownTerritory(territory))
    }

    fn controller_mut(&mut self, territory: TerritoryId) -> Result<&mut WaysideController, CommandError> {
        self.controllers.iter_mut().find(|c| c.territory() == territory)
            .ok_or(CommandError::UnknownTerritory(territory))
    }

    pub fn train_id(&self, name: &str) -> Result<TrainId, CommandError> {
        self.movement.find(name).ok_or_else(|| CommandError::UnknownTrain(name.to_string()))
    }

    pub fn occupancy(&self) -> OccupancyMessage {
        OccupancyMessage::snapshot(&self.topology, &self.state)
    }

    pub fn wayside_outputs(&self) -> Vec<WaysideOutputMessage> {
        self.controllers.iter().map(WaysideOutputMessage::from_controller).collect()
    }

    /// Loads a rule program and starts the controller running it. A
    /// rejected program leaves the controller as it was and is recorded
    /// as a fault.
    pub fn load_program(&mut self, time: f64, territory: TerritoryId, name: &str, source: &str)
        -> Result<(), CommandError> {
        let result = self.controller_mut(territory)?.load_rules(name, source);
        if let Err(e) = result {
            self.fault(time, Fault::from(e.clone()));
            return Err(e.into());
        }
        self.start_controller(time, territory)
    }

    pub fn load_logic(&mut self, time: f64, territory: TerritoryId,
                      logic: Box<dyn super::logic::ControlLogic>)
        -> Result<(), CommandError> {
        let result: Result<(), LogicLoadError> = self.controller_mut(territory)?.load(logic);
        if let Err(e) = result {
            self.fault(time, Fault::from(e.clone()));
            return Err(e.into());
        }
        self.start_controller(time, territory)
    }

    fn start_controller(&mut self, time: f64, territory: TerritoryId) -> Result<(), CommandError> {
        let c = self.controller_mut(territory)?;
        c.start()?;
        let state = c.program_state();
        self.history.track_event(time, TrackLogEvent::Program(territory, state));
        Ok(())
    }

    pub fn spawn_train(&mut self, time: f64, name: &str, block: &str, speed: Option<f64>,
                       direction: Option<Direction>) -> Result<TrainId, CommandError> {
        if self.movement.find(name).is_some() {
            return Err(CommandError::DuplicateTrain(name.to_string()));
        }
        let block = self.topology.lookup(block)?;
        let id = self.movement.spawn(&self.topology, &mut self.state, name, block, direction)?;
        let speed = speed.unwrap_or(self.config.default_speed);
        self.drivers.insert(id, Driver::new(speed));
        self.history.train_event(time, id, name, TrainLogEvent::Spawn(block));
        self.history.train_event(time, id, name, TrainLogEvent::Speed(speed));
        self.record_occupancy(time);
        Ok(id)
    }

    pub fn set_speed(&mut self, time: f64, name: &str, speed: f64) -> Result<(), CommandError> {
        let id = self.train_id(name)?;
        if let Some(d) = self.drivers.get_mut(&id) {
            d.target_speed = speed;
        }
        self.history.train_event(time, id, name, TrainLogEvent::Speed(speed));
        Ok(())
    }

    /// CTC dispatch: computes the protected authority from the train's
    /// block to `target` and posts it on the train's block.
    pub fn dispatch_authority(&mut self, time: f64, name: &str, target: &str)
        -> Result<Authority, CommandError> {
        let id = self.train_id(name)?;
        let target = self.topology.lookup(target)?;
        let (block, direction) = match self.movement.train(id) {
            Some(t) => (t.block, t.direction),
            None => return Err(CommandError::UnknownTrain(name.to_string())),
        };
        let mut calc = AuthorityCalculator::new(&self.topology);
        if let Some(max) = self.config.authority_max_steps {
            calc = calc.with_max_steps(max);
        }
        let result = calc.protected_authority(block, target, direction, &self.state);
        let authority = match result {
            Ok(a) => a,
            Err(e) => {
                self.fault(time, Fault::from(e.clone()));
                return Err(e.into());
            }
        };
        if let Some(clamp) = authority.limited_by {
            info!("Authority for {} cut short at clamped block {}", name, self.topology.name(clamp));
        }
        self.board.post_authority(block, authority.distance)?;
        Ok(authority)
    }

    pub fn post_speed(&mut self, block: &str, speed: f64) -> Result<(), CommandError> {
        let block = self.topology.lookup(block)?;
        self.board.post_speed(block, speed)?;
        Ok(())
    }

    pub fn set_maintenance(&mut self, time: f64, territory: TerritoryId, on: bool)
        -> Result<(), CommandError> {
        let c = self.controller_mut(territory)?;
        if on { c.enter_maintenance() } else { c.leave_maintenance() }
        debug!("Territory {} maintenance {} at {}", territory, on, time);
        Ok(())
    }

    pub fn set_override(&mut self, territory: TerritoryId, field: OverrideField,
                        index: usize, value: bool) -> Result<(), CommandError> {
        self.controller_mut(territory)?.set_override(field, index, value)?;
        Ok(())
    }

    /// Marks a block failed (broken rail, circuit failure). A failed block
    /// reads as occupied.
    pub fn set_failure(&mut self, time: f64, block: &str, on: bool) -> Result<(), CommandError> {
        let block = self.topology.lookup(block)?;
        self.state.set_failure(block, on)?;
        self.record_occupancy(time);
        Ok(())
    }

    pub fn reject(&mut self, time: f64, command: &str, e: &CommandError) {
        warn!("Command \"{}\" rejected: {}", command, e);
        self.history.track_event(time, TrackLogEvent::Rejected(format!("{}: {}", command, e)));
    }

    fn fault(&mut self, time: f64, fault: Fault) {
        if fault.is_safety_critical() {
            error!("{}", fault);
        } else {
            warn!("{}", fault);
        }
        self.history.track_event(time, TrackLogEvent::Fault(fault));
    }

    fn record_occupancy(&mut self, time: f64) {
        let now = OccupancyMessage::snapshot(&self.topology, &self.state);
        for (name, occupied) in &now.changes_since(&self.last_occupancy).blocks {
            if let Ok(idx) = self.topology.lookup(name) {
                self.history.track_event(time, TrackLogEvent::Occupied(idx, *occupied));
            }
        }
        self.last_occupancy = now;
    }

    fn apply_suggestions(&mut self, time: f64) {
        for change in self.board.take_changes(&self.state) {
            for train in self.movement.trains() {
                if train.block != change.block {
                    continue;
                }
                let driver = match self.drivers.get_mut(&train.id) {
                    Some(d) => d,
                    None => continue,
                };
                if let Some(speed) = change.speed {
                    driver.suggested_speed = Some(speed);
                }
                if let Some(authority) = change.authority {
                    driver.authority = Some((authority - train.traveled).max(0.0));
                    self.history.train_event(time, train.id, &train.name,
                                             TrainLogEvent::Authority(authority));
                }
            }
        }
    }

    /// One movement tick: apply changed suggestions, move every train by
    /// the distance its driver covers in `dt`.
    pub fn move_trains(&mut self, time: f64, dt: f64) {
        self.apply_suggestions(time);
        let ids: Vec<TrainId> = self.movement.trains().map(|t| t.id).collect();
        for id in ids {
            let (block, traveled) = match self.movement.train(id) {
                Some(t) => (t.block, t.traveled),
                None => continue,
            };
            let speed_limit = match self.topology.block_at(block) {
                Ok(b) => b.speed_limit,
                Err(_) => continue,
            };
            let dx = match self.drivers.get(&id) {
                Some(d) => d.step_distance(speed_limit, dt),
                None => continue,
            };
            if !(dx > 0.0) {
                continue;
            }
            match self.movement.advance(&self.topology, &mut self.state, id, traveled + dx) {
                Ok(report) => {
                    let moved = distance_moved(&self.topology, traveled, &report);
                    if let Some(d) = self.drivers.get_mut(&id) {
                        d.consume(moved);
                    }
                    self.record_movement(time, report);
                }
                Err(fault) => self.movement_fault(time, id, fault),
            }
        }
        self.record_occupancy(time);
    }

    fn record_movement(&mut self, time: f64, mut report: MovementReport) {
        let id = report.train;
        let name = match self.history.trains.get(&id) {
            Some(h) => h.name.clone(),
            None => String::new(),
        };
        for b in &report.entered {
            self.history.train_event(time, id, &name, TrainLogEvent::Enter(*b));
        }
        for (b, payload) in &report.beacons {
            debug!("Beacon at {} for {}: {}", self.topology.name(*b), name, payload);
            self.history.train_event(time, id, &name, TrainLogEvent::Beacon(*b, payload.clone()));
        }
        if report.despawned {
            self.drivers.remove(&id);
            self.history.train_event(time, id, &name, TrainLogEvent::Despawn(report.block));
            return;
        }
        if let Some(driver) = self.drivers.get_mut(&id) {
            let held = report.held_by.is_some();
            if held && !driver.held {
                if let Some(b) = report.held_by {
                    self.history.train_event(time, id, &name, TrainLogEvent::Hold(b));
                }
            }
            driver.held = held;
        }
        if let Some(fault) = report.fault.take() {
            self.movement_fault(time, id, fault);
        }
    }

    /// A train whose movement faults is stopped where it stands.
    fn movement_fault(&mut self, time: f64, id: TrainId, fault: MovementFault) {
        let name = self.movement.train(id).map(|t| t.name.clone()).unwrap_or_default();
        if let Some(driver) = self.drivers.get_mut(&id) {
            if !driver.stopped {
                driver.stopped = true;
                error!("Emergency stop of train {}", name);
                self.history.train_event(time, id, &name, TrainLogEvent::EmergencyStop);
            }
        }
        self.fault(time, Fault::from(fault));
    }

    /// One scan cycle of the controller at `index`.
    pub fn scan(&mut self, time: f64, index: usize) {
        let result = match self.controllers.get_mut(index) {
            Some(c) => c.tick(&self.topology, &mut self.state),
            None => return,
        };
        match result {
            Ok(report) => {
                let h = &mut self.history;
                for &(b, v) in &report.clamp_changes {
                    h.track_event(time, TrackLogEvent::Clamp(b, v));
                }
                for &(b, v) in &report.refused_moves {
                    h.track_event(time, TrackLogEvent::SwitchHeld(b, v));
                }
                for &(b, v) in &report.switch_moves {
                    h.track_event(time, TrackLogEvent::Switch(b, v));
                }
                for &(b, v) in &report.light_changes {
                    h.track_event(time, TrackLogEvent::Light(b, v));
                }
                for &(b, v) in &report.crossing_changes {
                    h.track_event(time, TrackLogEvent::Crossing(b, v));
                }
            }
            Err(e) => {
                let territory = self.controllers[index].territory();
                let state = self.controllers[index].program_state();
                self.fault(time, Fault::from(e));
                self.history.track_event(time, TrackLogEvent::Program(territory, state));
            }
        }
    }
}

struct MovementTick;

impl Process<TrackWorld> for MovementTick {
    fn resume(&mut self, world: &mut TrackWorld, time: f64, dt: f64) {
        world.move_trains(time, dt);
    }
}

struct ScanTick(usize);

impl Process<TrackWorld> for ScanTick {
    fn resume(&mut self, world: &mut TrackWorld, time: f64, _dt: f64) {
        world.scan(time, self.0);
    }
}

/// A track world on the event loop: movement at the configured rate and
/// each controller scanning at the scan rate. When a movement tick and a
/// scan fall on the same instant, trains move first.
pub struct TrackSimulation {
    sim: Simulation<TrackWorld>,
}

impl TrackSimulation {
    pub fn new(world: TrackWorld) -> TrackSimulation {
        let movement = world.config.movement_period();
        let scan = world.config.scan_period();
        let controllers = world.controllers.len();
        let mut sim = Simulation::new(world);
        sim.start_process(movement, Box::new(MovementTick));
        for i in 0..controllers {
            sim.start_process(scan, Box::new(ScanTick(i)));
        }
        TrackSimulation { sim }
    }

    pub fn time(&self) -> f64 { self.sim.time() }
    pub fn world(&self) -> &TrackWorld { &self.sim.world }
    pub fn world_mut(&mut self) -> &mut TrackWorld { &mut self.sim.world }

    pub fn advance_by(&mut self, dt: f64) {
        self.sim.advance_by(dt);
    }

    pub fn into_world(self) -> TrackWorld { self.sim.world }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> TrackWorld {
        let t = TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 10.0).territory(1))
            .block(BlockSpec::new("A", 2, 10.0).territory(1))
            .block(BlockSpec::new("A", 3, 10.0).territory(1))
            .block(BlockSpec::new("A", 4, 10.0).territory(1))
            .build()
            .unwrap();
        // 8 Hz keeps every step exact in binary floating point.
        TrackWorld::new(t, SimConfig { movement_hz: 8.0, ..SimConfig::default() }).unwrap()
    }

    #[test]
    fn driver_respects_authority() {
        let mut d = Driver::new(10.0);
        d.authority = Some(1.5);
        assert_eq!(d.step_distance(70.0, 0.1), 1.0);
        d.consume(1.0);
        assert_eq!(d.step_distance(70.0, 0.1), 0.5);
        d.consume(0.5);
        assert_eq!(d.step_distance(70.0, 0.1), 0.0);
        d.authority = Some(3.0);
        d.consume(0.0);
        assert_eq!(d.step_distance(70.0, 0.1), 1.0);
        d.authority = None;
        assert_eq!(d.step_distance(5.0, 1.0), 5.0);
    }

    #[test]
    fn trains_run_until_authority_is_used() {
        let mut sim = TrackSimulation::new(world());
        sim.world_mut().spawn_train(0.0, "t1", "A1", Some(8.0), None).unwrap();
        let a = sim.world_mut().dispatch_authority(0.0, "t1", "A3").unwrap();
        assert_eq!(a.distance, 20.0);
        sim.advance_by(5.0);

        let w = sim.world();
        let t = w.movement.train(w.train_id("t1").unwrap()).unwrap();
        assert_eq!(w.topology.name(t.block), "A2");
        assert!(w.state.is_occupied(1));
        assert!(!w.state.is_occupied(0));
    }

    #[test]
    fn held_train_keeps_its_authority() {
        let mut w = world();
        w.load_program(0.0, 1, "protect", "clamp[1] = occ[1];").unwrap();
        w.spawn_train(0.0, "t1", "A1", Some(8.0), None).unwrap();
        w.set_failure(0.0, "A2", true).unwrap();
        let a = w.dispatch_authority(0.0, "t1", "A4").unwrap();
        assert_eq!(a.distance, 30.0);

        let mut sim = TrackSimulation::new(w);
        sim.advance_by(5.0);
        {
            let w = sim.world();
            let id = w.train_id("t1").unwrap();
            assert_eq!(w.movement.train(id).unwrap().traveled, 10.0);
            assert!(w.drivers[&id].held);
            assert_eq!(w.drivers[&id].authority, Some(20.0));
        }

        let now = sim.time();
        sim.world_mut().set_failure(now, "A2", false).unwrap();
        sim.advance_by(5.0);
        let w = sim.world();
        let t = w.movement.train(w.train_id("t1").unwrap()).unwrap();
        assert_eq!(w.topology.name(t.block), "A3");
        assert_eq!(t.traveled, 10.0);
        assert_eq!(w.drivers[&t.id].authority, Some(0.0));
        assert!(!w.drivers[&t.id].held);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut w = world();
        assert_eq!(w.spawn_train(0.0, "t1", "Q9", None, None).unwrap_err(),
                   CommandError::Topology(TopologyError::UnknownBlock("Q9".to_string())));
        assert_eq!(w.set_speed(0.0, "nobody", 1.0).unwrap_err(),
                   CommandError::UnknownTrain("nobody".to_string()));
        assert_eq!(w.set_maintenance(0.0, 7, true).unwrap_err(),
                   CommandError::UnknownTerritory(7));
    }
}
