use smallvec::SmallVec;
use failure::Fail;

use crate::input::topology::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Occupancy {
    Unoccupied,
    Occupied,
    Maintenance,
    Failure,
}

impl Occupancy {
    /// Anything but `Unoccupied` is reported to the wayside as occupied.
    pub fn is_blocked(self) -> bool {
        self != Occupancy::Unoccupied
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockState {
    occupants: u32,
    maintenance: bool,
    failure: bool,
    switch_position: bool,
    light: bool,
    crossing: bool,
    clamped_by: SmallVec<[TerritoryId; 2]>,
}

impl BlockState {
    pub fn occupancy(&self) -> Occupancy {
        if self.failure {
            Occupancy::Failure
        } else if self.maintenance {
            Occupancy::Maintenance
        } else if self.occupants > 0 {
            Occupancy::Occupied
        } else {
            Occupancy::Unoccupied
        }
    }

    pub fn occupants(&self) -> u32 { self.occupants }
    pub fn has_failure(&self) -> bool { self.failure }
    pub fn switch_position(&self) -> bool { self.switch_position }
    pub fn light(&self) -> bool { self.light }
    pub fn crossing(&self) -> bool { self.crossing }
    pub fn is_clamped(&self) -> bool { !self.clamped_by.is_empty() }
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum StateError {
    #[fail(display = "territory {} may not write block \"{}\"", _0, _1)]
    OutsideTerritory(TerritoryId, String),
    #[fail(display = "{}", _0)]
    Topology(#[cause] TopologyError),
}

impl From<TopologyError> for StateError {
    fn from(e: TopologyError) -> StateError { StateError::Topology(e) }
}

/// Mutable per-block state shared by the runtime components.
///
/// Occupancy is written only by the movement simulator. Switch, light,
/// crossing and clamp fields are written only through a `TerritoryWriter`,
/// which refuses blocks outside its own territory.
#[derive(Debug, Clone)]
pub struct DynamicTrackState {
    blocks: Vec<BlockState>,
}

impl DynamicTrackState {
    pub fn new(topology: &TrackTopology) -> DynamicTrackState {
        DynamicTrackState { blocks: vec![BlockState::default(); topology.len()] }
    }

    pub fn block(&self, idx: BlockIdx) -> Result<&BlockState, TopologyError> {
        self.blocks.get(idx).ok_or(TopologyError::OutOfRange(idx, self.blocks.len()))
    }

    pub fn blocks(&self) -> &[BlockState] { &self.blocks }

    pub fn occupancy(&self, idx: BlockIdx) -> Occupancy {
        self.blocks.get(idx).map(|b| b.occupancy()).unwrap_or(Occupancy::Unoccupied)
    }

    pub fn is_occupied(&self, idx: BlockIdx) -> bool {
        self.occupancy(idx).is_blocked()
    }

    pub fn switch_position(&self, idx: BlockIdx) -> bool {
        self.blocks.get(idx).map(|b| b.switch_position).unwrap_or(false)
    }

    pub fn is_clamped(&self, idx: BlockIdx) -> bool {
        self.blocks.get(idx).map(|b| b.is_clamped()).unwrap_or(false)
    }

    /// A clamped block may not be entered while it is occupied.
    pub fn is_impassable(&self, idx: BlockIdx) -> bool {
        self.is_clamped(idx) && self.is_occupied(idx)
    }

    pub(crate) fn occupy(&mut self, idx: BlockIdx) -> Result<Occupancy, TopologyError> {
        let len = self.blocks.len();
        let b = self.blocks.get_mut(idx).ok_or(TopologyError::OutOfRange(idx, len))?;
        b.occupants += 1;
        Ok(b.occupancy())
    }

    pub(crate) fn vacate(&mut self, idx: BlockIdx) -> Result<Occupancy, TopologyError> {
        let len = self.blocks.len();
        let b = self.blocks.get_mut(idx).ok_or(TopologyError::OutOfRange(idx, len))?;
        b.occupants = b.occupants.saturating_sub(1);
        Ok(b.occupancy())
    }

    pub fn set_maintenance(&mut self, idx: BlockIdx, on: bool) -> Result<Occupancy, TopologyError> {
        let len = self.blocks.len();
        let b = self.blocks.get_mut(idx).ok_or(TopologyError::OutOfRange(idx, len))?;
        b.maintenance = on;
        Ok(b.occupancy())
    }

    pub fn set_failure(&mut self, idx: BlockIdx, on: bool) -> Result<Occupancy, TopologyError> {
        let len = self.blocks.len();
        let b = self.blocks.get_mut(idx).ok_or(TopologyError::OutOfRange(idx, len))?;
        b.failure = on;
        Ok(b.occupancy())
    }

    pub fn territory<'a>(&'a mut self, topology: &'a TrackTopology, territory: TerritoryId)
        -> TerritoryWriter<'a> {
        TerritoryWriter { state: self, topology, territory }
    }
}

/// Write access to the device fields of one territory.
pub struct TerritoryWriter<'a> {
    state: &'a mut DynamicTrackState,
    topology: &'a TrackTopology,
    territory: TerritoryId,
}

impl<'a> TerritoryWriter<'a> {
    fn owned(&mut self, idx: BlockIdx) -> Result<&mut BlockState, StateError> {
        let block = self.topology.block_at(idx)?;
        if !block.in_territory(self.territory) {
            return Err(StateError::OutsideTerritory(self.territory, block.name.clone()));
        }
        let len = self.state.blocks.len();
        self.state.blocks.get_mut(idx).ok_or(StateError::Topology(TopologyError::OutOfRange(idx, len)))
    }

    /// Returns whether the stored value changed.
    pub fn set_switch(&mut self, idx: BlockIdx, position: bool) -> Result<bool, StateError> {
        let b = self.owned(idx)?;
        let changed = b.switch_position != position;
        b.switch_position = position;
        Ok(changed)
    }

    pub fn set_light(&mut self, idx: BlockIdx, on: bool) -> Result<bool, StateError> {
        let b = self.owned(idx)?;
        let changed = b.light != on;
        b.light = on;
        Ok(changed)
    }

    pub fn set_crossing(&mut self, idx: BlockIdx, on: bool) -> Result<bool, StateError> {
        let b = self.owned(idx)?;
        let changed = b.crossing != on;
        b.crossing = on;
        Ok(changed)
    }

    /// Clamps on seam blocks are held per territory; the block counts as
    /// clamped while any owner clamps it.
    pub fn set_clamp(&mut self, idx: BlockIdx, on: bool) -> Result<bool, StateError> {
        let territory = self.territory;
        let b = self.owned(idx)?;
        let present = b.clamped_by.contains(&territory);
        if on && !present {
            b.clamped_by.push(territory);
        } else if !on && present {
            b.clamped_by.retain(|t| *t != territory);
        }
        Ok(on != present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo() -> TrackTopology {
        TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 10.0).territory(1).light())
            .block(BlockSpec::new("A", 2, 10.0).territory(1).territory(2))
            .block(BlockSpec::new("A", 3, 10.0).territory(2).crossing())
            .build()
            .unwrap()
    }

    #[test]
    fn writes_outside_territory_are_refused() {
        let t = topo();
        let mut s = DynamicTrackState::new(&t);
        {
            let mut w = s.territory(&t, 1);
            assert_eq!(w.set_light(0, true), Ok(true));
            assert_eq!(w.set_light(0, true), Ok(false));
            assert_eq!(w.set_crossing(2, true),
                       Err(StateError::OutsideTerritory(1, "A3".to_string())));
        }
        assert!(!s.block(2).unwrap().crossing());
        assert!(s.block(0).unwrap().light());
    }

    #[test]
    fn seam_clamp_held_by_each_owner() {
        let t = topo();
        let mut s = DynamicTrackState::new(&t);
        s.territory(&t, 1).set_clamp(1, true).unwrap();
        s.territory(&t, 2).set_clamp(1, true).unwrap();
        s.territory(&t, 1).set_clamp(1, false).unwrap();
        assert!(s.is_clamped(1));
        s.territory(&t, 2).set_clamp(1, false).unwrap();
        assert!(!s.is_clamped(1));
    }

    #[test]
    fn occupancy_precedence() {
        let t = topo();
        let mut s = DynamicTrackState::new(&t);
        assert_eq!(s.occupy(0).unwrap(), Occupancy::Occupied);
        assert_eq!(s.set_maintenance(0, true).unwrap(), Occupancy::Maintenance);
        assert_eq!(s.set_failure(0, true).unwrap(), Occupancy::Failure);
        s.set_failure(0, false).unwrap();
        s.set_maintenance(0, false).unwrap();
        assert_eq!(s.vacate(0).unwrap(), Occupancy::Unoccupied);
        assert!(!s.is_occupied(0));
    }
}
