use smallvec::SmallVec;
use failure::Fail;
use log::{debug, info, warn};

use std::collections::BTreeMap;

use crate::input::topology::*;
use super::state::DynamicTrackState;

pub type TrainId = usize;

/// How the train's last block transition involved a switch. Entering and
/// exiting are exclusive; the marker keeps a train from re-deciding the
/// same switch on its next step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwitchPassage {
    None,
    Entered,
    Exited,
}

#[derive(Debug, Clone)]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    pub block: BlockIdx,
    pub previous: Option<BlockIdx>,
    /// Distance traveled since entering `block`.
    pub traveled: Dist,
    pub direction: Direction,
    pub passage: SwitchPassage,
}

impl Train {
    pub fn entered_via_switch(&self) -> bool { self.passage == SwitchPassage::Entered }
    pub fn exited_via_switch(&self) -> bool { self.passage == SwitchPassage::Exited }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementReport {
    pub train: TrainId,
    pub block: BlockIdx,
    pub remaining: Dist,
    pub vacated: SmallVec<[BlockIdx; 4]>,
    pub entered: SmallVec<[BlockIdx; 4]>,
    pub beacons: SmallVec<[(BlockIdx, String); 1]>,
    pub despawned: bool,
    /// Set when the train is stopped at the end of its block because the
    /// next block is clamped and occupied.
    pub held_by: Option<BlockIdx>,
    /// Set when a step faulted. The train stays where it was before that
    /// step; everything it passed earlier in the tick is still reported.
    pub fault: Option<MovementFault>,
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum MovementFault {
    #[fail(display = "train {} leaving switch exit \"{}\" but switch at \"{}\" is set for \"{}\"",
           train, exit, switch, set_for)]
    SwitchMismatch { train: String, exit: String, switch: String, set_for: String },
    #[fail(display = "unknown train {}", _0)]
    UnknownTrain(TrainId),
    #[fail(display = "train {} crossed more than {} blocks in one step", _0, _1)]
    Runaway(String, usize),
    #[fail(display = "{}", _0)]
    Topology(#[cause] TopologyError),
}

impl MovementFault {
    pub fn is_safety_critical(&self) -> bool {
        match *self {
            MovementFault::SwitchMismatch { .. } => true,
            _ => false,
        }
    }
}

impl From<TopologyError> for MovementFault {
    fn from(e: TopologyError) -> MovementFault { MovementFault::Topology(e) }
}

struct Step {
    next: BlockIdx,
    direction: Direction,
    passage: SwitchPassage,
}

/// Advances trains block by block. The only writer of occupancy in
/// `DynamicTrackState`.
#[derive(Debug, Default)]
pub struct TrainMovementSimulator {
    trains: BTreeMap<TrainId, Train>,
    next_id: TrainId,
}

impl TrainMovementSimulator {
    pub fn new() -> Self { Default::default() }

    pub fn trains(&self) -> impl Iterator<Item = &Train> { self.trains.values() }

    pub fn train(&self, id: TrainId) -> Option<&Train> { self.trains.get(&id) }

    pub fn find(&self, name: &str) -> Option<TrainId> {
        self.trains.values().find(|t| t.name == name).map(|t| t.id)
    }

    /// Places a new train on `block`. Without an explicit direction the
    /// section's configured direction is used (increasing for
    /// bidirectional sections).
    pub fn spawn(&mut self, topology: &TrackTopology, state: &mut DynamicTrackState,
                 name: &str, block: BlockIdx, direction: Option<Direction>)
        -> Result<TrainId, TopologyError> {
        let section = topology.section_direction(block)?;
        let direction = match direction {
            Some(d) => section.resolve(d),
            None => section.resolve(Direction::Increasing),
        };
        state.occupy(block)?;

        let id = self.next_id;
        self.next_id += 1;
        self.trains.insert(id, Train {
            id,
            name: name.to_string(),
            block,
            previous: None,
            traveled: 0.0,
            direction,
            passage: SwitchPassage::None,
        });
        info!("Train {} spawned at {} going {:?}", name, topology.name(block), direction);
        Ok(id)
    }

    pub fn despawn(&mut self, state: &mut DynamicTrackState, id: TrainId)
        -> Result<Train, MovementFault> {
        let train = self.trains.remove(&id).ok_or(MovementFault::UnknownTrain(id))?;
        state.vacate(train.block)?;
        Ok(train)
    }

    /// Applies the distance a train has covered since entering its current
    /// block, stepping through as many blocks as that distance spans.
    /// Faults met on the way are returned in the report; `Err` is only for
    /// an unknown train.
    pub fn advance(&mut self, topology: &TrackTopology, state: &mut DynamicTrackState,
                   id: TrainId, distance_since_entry: Dist)
        -> Result<MovementReport, MovementFault> {
        let train = self.trains.get_mut(&id).ok_or(MovementFault::UnknownTrain(id))?;
        train.traveled = distance_since_entry;

        let mut report = MovementReport {
            train: id,
            block: train.block,
            remaining: train.traveled,
            vacated: SmallVec::new(),
            entered: SmallVec::new(),
            beacons: SmallVec::new(),
            despawned: false,
            held_by: None,
            fault: None,
        };

        let max_steps = 2 * topology.len() + 1;
        if let Err(fault) = run_steps(topology, state, train, &mut report, max_steps) {
            warn!("Train {} stopped at {}: {}", train.name, topology.name(train.block), fault);
            report.fault = Some(fault);
        }

        if report.despawned {
            self.trains.remove(&id);
        } else {
            report.block = train.block;
            report.remaining = train.traveled;
        }
        Ok(report)
    }
}

/// Steps `train` block by block until its distance fits its current block.
/// Each completed step is committed to `state` and `report` before the
/// next one is attempted.
fn run_steps(topology: &TrackTopology, state: &mut DynamicTrackState, train: &mut Train,
             report: &mut MovementReport, max_steps: usize) -> Result<(), MovementFault> {
    let mut steps = 0;
    loop {
        let length = topology.block_at(train.block)?.length;
        if !(train.traveled > length) {
            return Ok(());
        }
        if steps >= max_steps {
            return Err(MovementFault::Runaway(train.name.clone(), max_steps));
        }
        steps += 1;

        let step = next_step(topology, state, train)?;

        if state.is_impassable(step.next) {
            warn!("Train {} held at {}: {} is clamped and occupied",
                  train.name, topology.name(train.block), topology.name(step.next));
            train.traveled = length;
            report.held_by = Some(step.next);
            return Ok(());
        }

        let left = train.block;
        let entered = topology.block_at(step.next)?;
        let old = topology.block_at(left)?;
        let direction = if old.section != entered.section {
            match topology.section_direction(step.next)? {
                SectionDirection::Increasing => Direction::Increasing,
                SectionDirection::Decreasing => Direction::Decreasing,
                SectionDirection::Bidirectional => {
                    if entered.number > old.number {
                        Direction::Increasing
                    } else {
                        Direction::Decreasing
                    }
                }
            }
        } else {
            step.direction
        };

        state.vacate(left)?;
        train.traveled -= length;
        report.vacated.push(left);

        if Some(step.next) == topology.yard() {
            info!("Train {} despawned entering {}", train.name, topology.name(step.next));
            report.despawned = true;
            report.block = step.next;
            report.remaining = 0.0;
            return Ok(());
        }

        state.occupy(step.next)?;
        report.entered.push(step.next);
        train.previous = Some(left);
        train.block = step.next;
        train.passage = step.passage;
        train.direction = direction;
        debug!("Train {} entered {}", train.name, topology.name(step.next));

        if let Some(ref payload) = entered.beacon {
            report.beacons.push((step.next, payload.clone()));
        }
    }
}

fn next_step(topology: &TrackTopology, state: &DynamicTrackState, train: &Train)
    -> Result<Step, MovementFault> {
    if train.passage != SwitchPassage::Exited {
        if let Some(sw) = topology.switch_for(train.block)? {
            let dest = sw.destination(state.switch_position(train.block));
            return Ok(Step {
                next: dest.block,
                direction: train.direction,
                passage: SwitchPassage::Entered,
            });
        }
    }

    if train.passage != SwitchPassage::Entered {
        if let Some(sw) = topology.switch_feeding(train.block)? {
            let dest = sw.destination(state.switch_position(sw.entrance));
            if dest.block != train.block {
                return Err(MovementFault::SwitchMismatch {
                    train: train.name.clone(),
                    exit: topology.name(train.block).to_string(),
                    switch: topology.name(sw.entrance).to_string(),
                    set_for: topology.name(dest.block).to_string(),
                });
            }
            return Ok(Step {
                next: sw.entrance,
                direction: train.direction,
                passage: SwitchPassage::Exited,
            });
        }
    }

    let (next, direction) = topology.neighbor(train.block, train.direction)?;
    Ok(Step { next, direction, passage: SwitchPassage::None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight() -> TrackTopology {
        TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 10.0).territory(1))
            .block(BlockSpec::new("A", 2, 10.0).territory(1))
            .block(BlockSpec::new("A", 3, 10.0).territory(1).beacon("station ahead"))
            .block(BlockSpec::new("A", 4, 10.0).territory(1))
            .build()
            .unwrap()
    }

    #[test]
    fn advances_through_several_blocks() {
        let t = straight();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 0, None).unwrap();

        let r = sim.advance(&t, &mut s, id, 25.0).unwrap();
        assert_eq!(r.block, 2);
        assert_eq!(r.remaining, 5.0);
        assert_eq!(r.vacated.as_slice(), &[0, 1]);
        assert_eq!(r.entered.as_slice(), &[1, 2]);
        assert_eq!(r.beacons.as_slice(), &[(2, "station ahead".to_string())]);
        assert!(!s.is_occupied(0));
        assert!(!s.is_occupied(1));
        assert!(s.is_occupied(2));
    }

    #[test]
    fn exactly_block_length_stays() {
        let t = straight();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 0, None).unwrap();
        let r = sim.advance(&t, &mut s, id, 10.0).unwrap();
        assert_eq!(r.block, 0);
        assert!(r.entered.is_empty());
    }

    #[test]
    fn running_off_the_line_is_a_fault() {
        let t = straight();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 3, None).unwrap();
        let r = sim.advance(&t, &mut s, id, 11.0).unwrap();
        assert_eq!(r.fault, Some(MovementFault::Topology(
            TopologyError::NoNeighbor("A4".to_string(), Direction::Increasing))));
        assert_eq!(r.block, 3);
        assert!(s.is_occupied(3));
        assert_eq!(sim.advance(&t, &mut s, 99, 1.0), Err(MovementFault::UnknownTrain(99)));
    }

    #[test]
    fn loop_distance_is_bounded() {
        let t = TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 1.0).territory(1))
            .block(BlockSpec::new("A", 2, 1.0).territory(1))
            .jump("A2", Direction::Increasing, "A1", Direction::Increasing)
            .build()
            .unwrap();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 0, None).unwrap();
        let r = sim.advance(&t, &mut s, id, 1.0e9).unwrap();
        assert_eq!(r.fault, Some(MovementFault::Runaway("t1".to_string(), 5)));
        assert_eq!(r.entered.len(), 5);
        assert!(s.is_occupied(r.block));
        assert_eq!(s.is_occupied(0), r.block == 0);
    }

    /// A1 feeds B2 / C1; B2 carries a beacon and leads back into A1.
    fn junction() -> TrackTopology {
        TopologyBuilder::new()
            .section("A", SectionDirection::Bidirectional)
            .section("B", SectionDirection::Bidirectional)
            .section("C", SectionDirection::Bidirectional)
            .block(BlockSpec::new("A", 1, 10.0).territory(1).switch_to("B2", "C1"))
            .block(BlockSpec::new("B", 2, 10.0).territory(1).switch_exit("A1").beacon("payload"))
            .block(BlockSpec::new("B", 3, 10.0).territory(1))
            .block(BlockSpec::new("C", 1, 10.0).territory(1))
            .build()
            .unwrap()
    }

    #[test]
    fn fault_after_a_step_keeps_what_was_passed() {
        let t = junction();
        let mut s = DynamicTrackState::new(&t);
        s.territory(&t, 1).set_switch(0, true).unwrap();
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 2, Some(Direction::Decreasing)).unwrap();

        let r = sim.advance(&t, &mut s, id, 25.0).unwrap();
        assert!(r.fault.as_ref().map(|f| f.is_safety_critical()).unwrap_or(false));
        assert_eq!(r.entered.as_slice(), &[1]);
        assert_eq!(r.vacated.as_slice(), &[2]);
        assert_eq!(r.beacons.as_slice(), &[(1, "payload".to_string())]);
        assert_eq!(r.block, 1);
        assert_eq!(r.remaining, 15.0);
        assert!(s.is_occupied(1));
        assert!(!s.is_occupied(2));
        assert_eq!(sim.train(id).unwrap().block, 1);
    }

    #[test]
    fn switch_into_clamped_occupied_branch_holds() {
        let t = junction();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        sim.spawn(&t, &mut s, "t2", 3, None).unwrap();
        {
            let mut w = s.territory(&t, 1);
            w.set_switch(0, true).unwrap();
            w.set_clamp(3, true).unwrap();
        }
        let id = sim.spawn(&t, &mut s, "t1", 0, None).unwrap();

        let r = sim.advance(&t, &mut s, id, 12.0).unwrap();
        assert_eq!(r.held_by, Some(3));
        assert_eq!(r.block, 0);
        assert_eq!(r.remaining, 10.0);
        assert!(r.entered.is_empty());
        assert!(!sim.train(id).unwrap().entered_via_switch());
        assert_eq!(s.block(3).unwrap().occupants(), 1);

        s.territory(&t, 1).set_clamp(3, false).unwrap();
        let r = sim.advance(&t, &mut s, id, 12.0).unwrap();
        assert_eq!(r.held_by, None);
        assert_eq!(r.entered.as_slice(), &[3]);
        assert!(sim.train(id).unwrap().entered_via_switch());
        assert!(!s.is_occupied(0));
    }

    #[test]
    fn despawn_at_yard() {
        let t = TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .section("YARD", SectionDirection::Bidirectional)
            .block(BlockSpec::new("A", 1, 10.0).territory(1))
            .block(BlockSpec::new("YARD", 0, 10.0).territory(1))
            .build()
            .unwrap();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 0, None).unwrap();
        let r = sim.advance(&t, &mut s, id, 12.0).unwrap();
        assert!(r.despawned);
        assert!(!s.is_occupied(0));
        assert!(!s.is_occupied(1));
        assert!(sim.train(id).is_none());
    }

    #[test]
    fn bidirectional_direction_from_block_numbers() {
        let t = TopologyBuilder::new()
            .section("A", SectionDirection::Decreasing)
            .section("B", SectionDirection::Bidirectional)
            .block(BlockSpec::new("B", 1, 10.0).territory(1))
            .block(BlockSpec::new("B", 2, 10.0).territory(1))
            .block(BlockSpec::new("A", 3, 10.0).territory(1))
            .build()
            .unwrap();
        let mut s = DynamicTrackState::new(&t);
        let mut sim = TrainMovementSimulator::new();
        let id = sim.spawn(&t, &mut s, "t1", 2, None).unwrap();
        assert_eq!(sim.train(id).unwrap().direction, Direction::Decreasing);
        sim.advance(&t, &mut s, id, 15.0).unwrap();
        let train = sim.train(id).unwrap();
        assert_eq!(train.block, 1);
        assert_eq!(train.direction, Direction::Decreasing);
        sim.advance(&t, &mut s, id, 15.0).unwrap();
        assert_eq!(sim.train(id).unwrap().block, 0);
    }
}
