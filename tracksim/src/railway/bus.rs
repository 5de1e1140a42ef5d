//! Messages exchanged between the track model, the wayside controllers and
//! the CTC.

use std::collections::BTreeMap;

use crate::eventsim::observable::Observable;
use crate::input::topology::*;
use super::state::DynamicTrackState;
use super::wayside::WaysideController;

/// Occupancy broadcast by the track model, keyed by block name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancyMessage {
    pub blocks: BTreeMap<String, bool>,
}

impl OccupancyMessage {
    pub fn snapshot(topology: &TrackTopology, state: &DynamicTrackState) -> OccupancyMessage {
        OccupancyMessage {
            blocks: topology.blocks().iter().enumerate()
                .map(|(idx, b)| (b.name.clone(), state.is_occupied(idx)))
                .collect(),
        }
    }

    /// Entries whose value differs from `previous`. Blocks missing from
    /// `previous` count as unoccupied.
    pub fn changes_since(&self, previous: &OccupancyMessage) -> OccupancyMessage {
        OccupancyMessage {
            blocks: self.blocks.iter()
                .filter(|&(name, occ)| previous.blocks.get(name).cloned().unwrap_or(false) != *occ)
                .map(|(name, occ)| (name.clone(), *occ))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }
}

/// Device outputs of one controller, indexed by territory-local position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaysideOutputMessage {
    pub territory: TerritoryId,
    pub switch_positions: Vec<bool>,
    pub light_signals: Vec<bool>,
    pub crossing_signals: Vec<bool>,
}

impl WaysideOutputMessage {
    pub fn from_controller(c: &WaysideController) -> WaysideOutputMessage {
        WaysideOutputMessage {
            territory: c.territory(),
            switch_positions: c.switch_positions().to_vec(),
            light_signals: c.light_signals().to_vec(),
            crossing_signals: c.crossing_signals().to_vec(),
        }
    }
}

/// A suggested value that changed since the last `take_changes`.
#[derive(Clone, Debug, PartialEq)]
pub struct SuggestionChange {
    pub block: BlockIdx,
    pub speed: Option<f64>,
    pub authority: Option<f64>,
}

/// Suggested speed and authority per block, as posted by the CTC.
///
/// Receivers apply a value once when it changes, not every tick. A clamped
/// block always carries an effective authority of zero, whatever was
/// posted for it.
#[derive(Clone, Debug)]
pub struct SuggestionBoard {
    speeds: Vec<Observable<f64>>,
    authorities: Vec<Observable<f64>>,
    clamped: Vec<bool>,
}

impl SuggestionBoard {
    pub fn new(topology: &TrackTopology) -> SuggestionBoard {
        let n = topology.len();
        SuggestionBoard {
            speeds: vec![Observable::new(0.0); n],
            authorities: vec![Observable::new(0.0); n],
            clamped: vec![false; n],
        }
    }

    pub fn post_speed(&mut self, block: BlockIdx, speed: f64) -> Result<bool, TopologyError> {
        let n = self.speeds.len();
        let slot = self.speeds.get_mut(block).ok_or(TopologyError::OutOfRange(block, n))?;
        Ok(slot.set(speed))
    }

    pub fn post_authority(&mut self, block: BlockIdx, authority: f64) -> Result<bool, TopologyError> {
        let n = self.authorities.len();
        let slot = self.authorities.get_mut(block).ok_or(TopologyError::OutOfRange(block, n))?;
        Ok(slot.set(authority))
    }

    pub fn speed(&self, block: BlockIdx) -> Option<f64> {
        self.speeds.get(block).map(|o| *o.get())
    }

    pub fn effective_authority(&self, block: BlockIdx, state: &DynamicTrackState) -> Option<f64> {
        let posted = *self.authorities.get(block)?.get();
        Some(if state.is_clamped(block) { 0.0 } else { posted })
    }

    /// Collects every block whose speed or effective authority changed. A
    /// clamp being set or released counts as an authority change.
    pub fn take_changes(&mut self, state: &DynamicTrackState) -> Vec<SuggestionChange> {
        let mut changes = Vec::new();
        for block in 0..self.speeds.len() {
            let clamped = state.is_clamped(block);
            let clamp_changed = clamped != self.clamped[block];
            self.clamped[block] = clamped;

            let speed = self.speeds[block].take();
            let posted = self.authorities[block].take();
            let authority = if clamp_changed || posted.is_some() {
                let value = *self.authorities[block].get();
                Some(if clamped { 0.0 } else { value })
            } else {
                None
            };

            if speed.is_some() || authority.is_some() {
                changes.push(SuggestionChange { block, speed, authority });
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn topo() -> TrackTopology {
        TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 100.0).territory(1))
            .block(BlockSpec::new("A", 2, 100.0).territory(1))
            .build().unwrap()
    }

    #[test]
    fn occupancy_changes() {
        let t = topo();
        let mut s = DynamicTrackState::new(&t);
        let before = OccupancyMessage::snapshot(&t, &s);
        s.occupy(1).unwrap();
        let after = OccupancyMessage::snapshot(&t, &s);
        assert_eq!(after.blocks, btreemap! { "A1".to_string() => false, "A2".to_string() => true });
        assert_eq!(after.changes_since(&before).blocks, btreemap! { "A2".to_string() => true });
        assert!(after.changes_since(&after).is_empty());
    }

    #[test]
    fn suggestions_apply_once_per_change() {
        let t = topo();
        let mut s = DynamicTrackState::new(&t);
        let mut board = SuggestionBoard::new(&t);

        board.post_speed(0, 12.0).unwrap();
        board.post_authority(0, 150.0).unwrap();
        assert_eq!(board.take_changes(&s),
                   vec![SuggestionChange { block: 0, speed: Some(12.0), authority: Some(150.0) }]);
        assert!(board.take_changes(&s).is_empty());

        board.post_authority(0, 150.0).unwrap();
        assert!(board.take_changes(&s).is_empty());

        s.territory(&t, 1).set_clamp(0, true).unwrap();
        assert_eq!(board.effective_authority(0, &s), Some(0.0));
        assert_eq!(board.take_changes(&s),
                   vec![SuggestionChange { block: 0, speed: None, authority: Some(0.0) }]);

        s.territory(&t, 1).set_clamp(0, false).unwrap();
        assert_eq!(board.take_changes(&s),
                   vec![SuggestionChange { block: 0, speed: None, authority: Some(150.0) }]);
        assert!(board.post_speed(7, 1.0).is_err());
    }
}
