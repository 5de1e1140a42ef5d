use failure::Fail;
use log::{debug, error, info, warn};

use std::mem;

use crate::input::topology::*;
use crate::input::rule_parser::{parse_rules, RuleParseError};
use super::state::{DynamicTrackState, StateError};
use super::logic::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProgramState {
    NoProgram,
    Loaded,
    Running,
    /// Stopped after logic produced malformed output; the territory keeps
    /// its last good outputs until an operator restarts it.
    Halted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Automatic,
    MaintenanceOverride,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverrideField {
    Occupancy,
    Switch,
    Light,
    Crossing,
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum LogicLoadError {
    #[fail(display = "logic \"{}\" rejected: {}", _0, _1)]
    Contract(String, #[cause] ContractViolation),
    #[fail(display = "logic \"{}\" refers to block {} but territory has {} blocks", _0, _1, _2)]
    IndexOutOfRange(String, usize, usize),
    #[fail(display = "rule program \"{}\": {}", _0, _1)]
    Parse(String, #[cause] RuleParseError),
    #[fail(display = "logic \"{}\" asks for {} memory latches; the limit is {}", _0, _1, _2)]
    MemoryTooLarge(String, usize, usize),
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum ScanError {
    #[fail(display = "territory {} halted: {}", territory, violation)]
    LogicRuntimeType { territory: TerritoryId, #[cause] violation: ContractViolation },
    #[fail(display = "{}", _0)]
    State(#[cause] StateError),
}

impl From<StateError> for ScanError {
    fn from(e: StateError) -> ScanError { ScanError::State(e) }
}

impl From<TopologyError> for ScanError {
    fn from(e: TopologyError) -> ScanError { ScanError::State(StateError::Topology(e)) }
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum OperatorError {
    #[fail(display = "territory {} has no program loaded", _0)]
    NoProgram(TerritoryId),
    #[fail(display = "territory {} is not in maintenance mode", _0)]
    NotInMaintenance(TerritoryId),
    #[fail(display = "local index {} outside territory of {} blocks", _0, _1)]
    IndexOutOfRange(usize, usize),
}

/// Operator-supplied values used in maintenance mode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Override {
    pub occupancies: Vec<bool>,
    pub switch_positions: Vec<bool>,
    pub light_signals: Vec<bool>,
    pub crossing_signals: Vec<bool>,
}

impl Override {
    fn defaults(n: usize) -> Override {
        Override {
            occupancies: vec![false; n],
            switch_positions: vec![false; n],
            light_signals: vec![false; n],
            crossing_signals: vec![false; n],
        }
    }
}

/// What one scan cycle changed. Block references are global indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanReport {
    pub territory: TerritoryId,
    pub switch_moves: Vec<(BlockIdx, bool)>,
    /// Switch moves refused because a downstream block is clamped and
    /// occupied.
    pub refused_moves: Vec<(BlockIdx, bool)>,
    pub light_changes: Vec<(BlockIdx, bool)>,
    pub crossing_changes: Vec<(BlockIdx, bool)>,
    pub clamp_changes: Vec<(BlockIdx, bool)>,
}

/// One wayside PLC and the territory it controls.
pub struct WaysideController {
    territory: TerritoryId,
    blocks: Vec<BlockIdx>,
    occupancies: Vec<bool>,
    previous_occupancies: Vec<bool>,
    switch_positions: Vec<bool>,
    light_signals: Vec<bool>,
    crossing_signals: Vec<bool>,
    exit_blocks: Vec<bool>,
    clamps: Vec<bool>,
    logic: Option<Box<dyn ControlLogic>>,
    memory: Vec<bool>,
    program_state: ProgramState,
    mode: Mode,
    overrides: Override,
}

impl WaysideController {
    pub fn new(topology: &TrackTopology, territory: TerritoryId) -> Result<Self, TopologyError> {
        let blocks = topology.territory_blocks(territory);
        if blocks.is_empty() {
            return Err(TopologyError::UnknownTerritory(territory));
        }
        let n = blocks.len();
        let mut exit_blocks = Vec::with_capacity(n);
        for b in &blocks {
            exit_blocks.push(topology.block_at(*b)?.is_switch_exit());
        }
        Ok(WaysideController {
            territory,
            blocks,
            occupancies: vec![false; n],
            previous_occupancies: vec![false; n],
            switch_positions: vec![false; n],
            light_signals: vec![false; n],
            crossing_signals: vec![false; n],
            exit_blocks,
            clamps: vec![false; n],
            logic: None,
            memory: Vec::new(),
            program_state: ProgramState::NoProgram,
            mode: Mode::Automatic,
            overrides: Override::defaults(n),
        })
    }

    pub fn territory(&self) -> TerritoryId { self.territory }
    pub fn blocks(&self) -> &[BlockIdx] { &self.blocks }
    pub fn len(&self) -> usize { self.blocks.len() }
    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }
    pub fn program_state(&self) -> ProgramState { self.program_state }
    pub fn mode(&self) -> Mode { self.mode }
    pub fn memory(&self) -> &[bool] { &self.memory }
    pub fn occupancies(&self) -> &[bool] { &self.occupancies }
    pub fn previous_occupancies(&self) -> &[bool] { &self.previous_occupancies }
    pub fn switch_positions(&self) -> &[bool] { &self.switch_positions }
    pub fn light_signals(&self) -> &[bool] { &self.light_signals }
    pub fn crossing_signals(&self) -> &[bool] { &self.crossing_signals }
    pub fn clamps(&self) -> &[bool] { &self.clamps }
    pub fn overrides(&self) -> &Override { &self.overrides }

    pub fn program_name(&self) -> Option<&str> {
        self.logic.as_ref().map(|l| l.name())
    }

    pub fn local_index(&self, block: BlockIdx) -> Option<usize> {
        self.blocks.iter().position(|b| *b == block)
    }

    /// Installs new logic after a dry run against all-false inputs. On
    /// rejection the previous logic and program state are untouched.
    pub fn load(&mut self, logic: Box<dyn ControlLogic>) -> Result<(), LogicLoadError> {
        let n = self.blocks.len();
        if let Some(max) = logic.max_block_index() {
            if max >= n {
                return Err(LogicLoadError::IndexOutOfRange(logic.name().to_string(), max, n));
            }
        }
        let memory_size = logic.memory_size();
        if memory_size > MAX_MEMORY {
            return Err(LogicLoadError::MemoryTooLarge(logic.name().to_string(), memory_size, MAX_MEMORY));
        }
        let mut scratch = vec![false; memory_size];
        let outputs = logic.evaluate(&LogicInputs::all_false(n), &mut scratch);
        validate(&outputs, n)
            .map_err(|e| LogicLoadError::Contract(logic.name().to_string(), e))?;

        info!("Territory {}: loaded logic \"{}\"", self.territory, logic.name());
        self.memory = vec![false; memory_size];
        self.logic = Some(logic);
        if self.program_state != ProgramState::Running {
            self.program_state = ProgramState::Loaded;
        }
        Ok(())
    }

    pub fn load_rules(&mut self, name: &str, source: &str) -> Result<(), LogicLoadError> {
        let program = parse_rules(name, source)
            .map_err(|e| LogicLoadError::Parse(name.to_string(), e))?;
        self.load(Box::new(program))
    }

    pub fn start(&mut self) -> Result<(), OperatorError> {
        match self.program_state {
            ProgramState::NoProgram => Err(OperatorError::NoProgram(self.territory)),
            _ => {
                self.program_state = ProgramState::Running;
                Ok(())
            }
        }
    }

    pub fn stop(&mut self) {
        if self.program_state == ProgramState::Running {
            self.program_state = ProgramState::Loaded;
        }
    }

    /// Operator values start from the controller's current view.
    pub fn enter_maintenance(&mut self) {
        if self.mode == Mode::MaintenanceOverride {
            return;
        }
        info!("Territory {}: maintenance override", self.territory);
        self.mode = Mode::MaintenanceOverride;
        self.overrides = Override {
            occupancies: self.occupancies.clone(),
            switch_positions: self.switch_positions.clone(),
            light_signals: self.light_signals.clone(),
            crossing_signals: self.crossing_signals.clone(),
        };
    }

    pub fn leave_maintenance(&mut self) {
        info!("Territory {}: automatic", self.territory);
        self.mode = Mode::Automatic;
        self.overrides = Override::defaults(self.blocks.len());
    }

    pub fn set_override(&mut self, field: OverrideField, index: usize, value: bool)
        -> Result<(), OperatorError> {
        if self.mode != Mode::MaintenanceOverride {
            return Err(OperatorError::NotInMaintenance(self.territory));
        }
        let n = self.blocks.len();
        let v = match field {
            OverrideField::Occupancy => &mut self.overrides.occupancies,
            OverrideField::Switch => &mut self.overrides.switch_positions,
            OverrideField::Light => &mut self.overrides.light_signals,
            OverrideField::Crossing => &mut self.overrides.crossing_signals,
        };
        let slot = v.get_mut(index).ok_or(OperatorError::IndexOutOfRange(index, n))?;
        *slot = value;
        Ok(())
    }

    fn inputs(&self) -> LogicInputs {
        LogicInputs {
            block_occupancies: self.occupancies.clone(),
            switch_positions: self.switch_positions.clone(),
            light_signals: self.light_signals.clone(),
            crossing_signals: self.crossing_signals.clone(),
            previous_occupancies: self.previous_occupancies.clone(),
            exit_blocks: self.exit_blocks.clone(),
            clamps: self.clamps.clone(),
        }
    }

    /// One scan cycle: sample occupancy, evaluate, validate, write back.
    pub fn tick(&mut self, topology: &TrackTopology, state: &mut DynamicTrackState)
        -> Result<ScanReport, ScanError> {
        let n = self.blocks.len();
        let sampled = match self.mode {
            Mode::Automatic => self.blocks.iter().map(|b| state.is_occupied(*b)).collect(),
            Mode::MaintenanceOverride => self.overrides.occupancies.clone(),
        };
        self.previous_occupancies = mem::replace(&mut self.occupancies, sampled);

        let outputs = match self.mode {
            Mode::MaintenanceOverride => {
                let raw = LogicOutputs::from_bools(&self.overrides.switch_positions,
                                                   &self.overrides.light_signals,
                                                   &self.overrides.crossing_signals,
                                                   &self.clamps);
                validate(&raw, n).map_err(|violation| self.halt(violation))?
            }
            Mode::Automatic => {
                let logic = match (self.program_state, self.logic.as_ref()) {
                    (ProgramState::Running, Some(logic)) => logic,
                    _ => return Ok(ScanReport { territory: self.territory, ..Default::default() }),
                };
                let inputs = self.inputs();
                let mut memory = self.memory.clone();
                let raw = logic.evaluate(&inputs, &mut memory);
                let validated = validate(&raw, n).map_err(|violation| self.halt(violation))?;
                self.memory = memory;
                validated
            }
        };

        self.apply(topology, state, outputs)
    }

    fn halt(&mut self, violation: ContractViolation) -> ScanError {
        error!("Territory {}: logic output rejected, halting: {}", self.territory, violation);
        self.program_state = ProgramState::Halted;
        ScanError::LogicRuntimeType { territory: self.territory, violation }
    }

    fn apply(&mut self, topology: &TrackTopology, state: &mut DynamicTrackState,
             outputs: ValidatedOutputs) -> Result<ScanReport, ScanError> {
        let mut report = ScanReport { territory: self.territory, ..Default::default() };

        // Clamps go first so the interlock below sees this cycle's clamps.
        {
            let mut w = state.territory(topology, self.territory);
            for (local, &block) in self.blocks.iter().enumerate() {
                if w.set_clamp(block, outputs.clamps[local])? {
                    report.clamp_changes.push((block, outputs.clamps[local]));
                }
            }
        }
        self.clamps = outputs.clamps;

        let mut switches = Vec::new();
        for (local, &block) in self.blocks.iter().enumerate() {
            let info = topology.block_at(block)?;
            let desired = outputs.switch_positions[local];
            if let Some(sw) = topology.switch_for(block)? {
                let current = state.switch_position(block);
                if desired != current && switch_locked(state, block, sw) {
                    warn!("Territory {}: switch at {} held, downstream block clamped and occupied",
                          self.territory, info.name);
                    report.refused_moves.push((block, desired));
                    self.switch_positions[local] = current;
                    continue;
                }
                switches.push((block, desired));
            }
            self.switch_positions[local] = desired;
        }

        let mut w = state.territory(topology, self.territory);
        for (block, position) in switches {
            if w.set_switch(block, position)? {
                debug!("Territory {}: switch {} -> {}", self.territory, topology.name(block), position as u8);
                report.switch_moves.push((block, position));
            }
        }
        for (local, &block) in self.blocks.iter().enumerate() {
            let info = topology.block_at(block)?;
            if info.has_light() && w.set_light(block, outputs.light_signals[local])? {
                report.light_changes.push((block, outputs.light_signals[local]));
            }
            if info.has_crossing() && w.set_crossing(block, outputs.crossing_signals[local])? {
                report.crossing_changes.push((block, outputs.crossing_signals[local]));
            }
        }
        self.light_signals = outputs.light_signals;
        self.crossing_signals = outputs.crossing_signals;

        Ok(report)
    }
}

/// A switch may not move while its own block or either branch is clamped
/// and occupied.
fn switch_locked(state: &DynamicTrackState, entrance: BlockIdx, sw: &Switch) -> bool {
    state.is_impassable(entrance)
        || sw.positions.iter().any(|dest| state.is_impassable(dest.block))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn territory() -> TrackTopology {
        TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 10.0).territory(1).light())
            .block(BlockSpec::new("A", 2, 10.0).territory(1).crossing())
            .block(BlockSpec::new("A", 3, 10.0).territory(1).territory(2))
            .block(BlockSpec::new("A", 4, 10.0).territory(2).light())
            .build()
            .unwrap()
    }

    #[test]
    fn rejected_load_keeps_previous_logic() {
        let t = territory();
        let mut c = WaysideController::new(&t, 1).unwrap();
        assert!(c.load_rules("int", "light[0] = 1;").is_err());
        assert_eq!(c.program_state(), ProgramState::NoProgram);

        c.load_rules("good", "light[0] = !occ[1];").unwrap();
        c.start().unwrap();
        match c.load_rules("too_wide", "light[3] = true;") {
            Err(LogicLoadError::IndexOutOfRange(_, 3, 3)) => {}
            x => panic!("unexpected {:?}", x),
        }
        let short = LogicFn::new("short", |_: &LogicInputs, _: &mut [bool]| {
            LogicOutputs::from_bools(&[false], &[false], &[false], &[false])
        });
        assert!(c.load(Box::new(short)).is_err());
        assert_eq!(c.program_name(), Some("good"));
        assert_eq!(c.program_state(), ProgramState::Running);
    }

    #[test]
    fn oversized_memory_is_rejected() {
        let t = territory();
        let mut c = WaysideController::new(&t, 1).unwrap();
        match c.load_rules("big", "mem[9223372036854775807] = true;") {
            Err(LogicLoadError::Parse(_, RuleParseError::MemoryIndex(..))) => {}
            x => panic!("unexpected {:?}", x),
        }
        let latches = LogicFn::new("latches", |i: &LogicInputs, _: &mut [bool]| {
            LogicOutputs::from_bools(&i.switch_positions, &i.light_signals,
                                     &i.crossing_signals, &i.clamps)
        }).with_memory(usize::max_value());
        match c.load(Box::new(latches)) {
            Err(LogicLoadError::MemoryTooLarge(ref name, _, MAX_MEMORY)) => assert_eq!(name, "latches"),
            x => panic!("unexpected {:?}", x),
        }
        assert_eq!(c.program_state(), ProgramState::NoProgram);
        assert!(c.memory().is_empty());
    }

    #[test]
    fn start_requires_program() {
        let t = territory();
        let mut c = WaysideController::new(&t, 1).unwrap();
        assert_eq!(c.start(), Err(OperatorError::NoProgram(1)));
        assert!(WaysideController::new(&t, 9).is_err());
    }

    #[test]
    fn scan_writes_only_own_devices() {
        let t = territory();
        let mut s = DynamicTrackState::new(&t);
        let mut c = WaysideController::new(&t, 1).unwrap();
        c.load_rules("all_on", "light[0] = true; crossing[1] = true; light[2] = true;").unwrap();
        c.start().unwrap();
        let r = c.tick(&t, &mut s).unwrap();
        assert_eq!(r.light_changes, vec![(0, true)]);
        assert_eq!(r.crossing_changes, vec![(1, true)]);
        // A3 is a device-free seam block, A4 belongs to territory 2
        assert!(!s.blocks()[2].light());
        assert!(!s.blocks()[3].light());
    }

    #[test]
    fn malformed_runtime_output_halts_in_last_good_state() {
        let t = territory();
        let mut s = DynamicTrackState::new(&t);
        let mut c = WaysideController::new(&t, 1).unwrap();
        // Well-formed on all-false input, malformed once block 0 is occupied.
        let logic = LogicFn::new("flaky", |i: &LogicInputs, _: &mut [bool]| {
            let mut out = LogicOutputs::from_bools(&i.switch_positions, &[true, false, false],
                                                   &i.crossing_signals, &i.clamps);
            if i.block_occupancies[0] {
                out.light_signals[0] = Value::Int(7);
            }
            out
        });
        c.load(Box::new(logic)).unwrap();
        c.start().unwrap();
        c.tick(&t, &mut s).unwrap();
        assert!(s.blocks()[0].light());

        s.occupy(0).unwrap();
        match c.tick(&t, &mut s) {
            Err(ScanError::LogicRuntimeType { territory: 1, .. }) => {}
            x => panic!("unexpected {:?}", x),
        }
        assert_eq!(c.program_state(), ProgramState::Halted);
        assert!(s.blocks()[0].light());
        assert_eq!(c.light_signals(), &[true, false, false]);

        // halted controllers do not scan
        assert_eq!(c.tick(&t, &mut s).unwrap().light_changes, vec![]);
    }

    #[test]
    fn maintenance_bypasses_logic() {
        let t = territory();
        let mut s = DynamicTrackState::new(&t);
        let mut c = WaysideController::new(&t, 1).unwrap();
        c.load(Box::new(HoldLogic)).unwrap();
        c.start().unwrap();
        assert_eq!(c.set_override(OverrideField::Light, 0, true),
                   Err(OperatorError::NotInMaintenance(1)));

        c.enter_maintenance();
        c.set_override(OverrideField::Light, 0, true).unwrap();
        c.set_override(OverrideField::Occupancy, 2, true).unwrap();
        assert_eq!(c.set_override(OverrideField::Light, 5, true),
                   Err(OperatorError::IndexOutOfRange(5, 3)));
        c.tick(&t, &mut s).unwrap();
        assert!(s.blocks()[0].light());
        assert_eq!(c.occupancies(), &[false, false, true]);

        c.leave_maintenance();
        assert_eq!(c.overrides().light_signals, vec![false; 3]);
        assert_eq!(c.mode(), Mode::Automatic);
    }
}
