use failure::Fail;

use crate::input::topology::*;
use super::state::DynamicTrackState;

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum AuthorityError {
    #[fail(display = "{}", _0)]
    Topology(#[cause] TopologyError),
    #[fail(display = "no path from \"{}\" to \"{}\" within {} steps", start, end, steps)]
    NonTermination { start: String, end: String, steps: usize },
}

impl From<TopologyError> for AuthorityError {
    fn from(e: TopologyError) -> AuthorityError { AuthorityError::Topology(e) }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Authority {
    pub distance: Dist,
    /// First clamped block on the path, if the walk was cut short by one.
    pub limited_by: Option<BlockIdx>,
}

/// Planned travel distances over the static topology. Advisory only:
/// switches are not consulted, and dynamic state is only read for clamps
/// by `protected_authority`.
pub struct AuthorityCalculator<'a> {
    topology: &'a TrackTopology,
    max_steps: usize,
}

impl<'a> AuthorityCalculator<'a> {
    pub fn new(topology: &'a TrackTopology) -> Self {
        AuthorityCalculator { topology, max_steps: 2 * topology.len() + 1 }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn max_steps(&self) -> usize { self.max_steps }

    /// Sum of the lengths of every block left behind walking from `start`
    /// until `end` is reached.
    pub fn authority(&self, start: BlockIdx, end: BlockIdx, initial_direction: Direction)
        -> Result<Dist, AuthorityError> {
        self.walk(start, end, initial_direction, |_| false).map(|a| a.distance)
    }

    /// Like `authority`, but the walk stops in front of the first block the
    /// wayside has clamped.
    pub fn protected_authority(&self, start: BlockIdx, end: BlockIdx,
                               initial_direction: Direction,
                               state: &DynamicTrackState)
        -> Result<Authority, AuthorityError> {
        self.walk(start, end, initial_direction, |b| state.is_clamped(b))
    }

    fn walk<F: Fn(BlockIdx) -> bool>(&self, start: BlockIdx, end: BlockIdx,
                                      initial_direction: Direction, stop: F)
        -> Result<Authority, AuthorityError> {
        self.topology.block_at(start)?;
        self.topology.block_at(end)?;

        let mut current = start;
        let mut dir = initial_direction;
        let mut distance = 0.0;
        for _ in 0..self.max_steps {
            if current == end {
                return Ok(Authority { distance, limited_by: None });
            }
            dir = self.topology.section_direction(current)?.resolve(dir);
            let (next, next_dir) = self.topology.neighbor(current, dir)?;
            distance += self.topology.block_at(current)?.length;
            if stop(next) {
                return Ok(Authority { distance, limited_by: Some(next) });
            }
            current = next;
            dir = next_dir;
        }
        if current == end {
            return Ok(Authority { distance, limited_by: None });
        }

        Err(AuthorityError::NonTermination {
            start: self.topology.name(start).to_string(),
            end: self.topology.name(end).to_string(),
            steps: self.max_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A1..A4 one-way loop, B1/B2 a bidirectional spur reachable only from
    // outside the loop.
    fn loop_line() -> TrackTopology {
        TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .section("B", SectionDirection::Bidirectional)
            .block(BlockSpec::new("A", 1, 10.0).territory(1))
            .block(BlockSpec::new("A", 2, 20.0).territory(1))
            .block(BlockSpec::new("A", 3, 30.0).territory(1))
            .block(BlockSpec::new("A", 4, 40.0).territory(1))
            .block(BlockSpec::new("B", 5, 50.0).territory(1))
            .block(BlockSpec::new("B", 6, 60.0).territory(1))
            .jump("A4", Direction::Increasing, "A1", Direction::Increasing)
            .build()
            .unwrap()
    }

    #[test]
    fn same_block_is_zero() {
        let t = loop_line();
        let calc = AuthorityCalculator::new(&t);
        for b in 0..t.len() {
            assert_eq!(calc.authority(b, b, Direction::Increasing), Ok(0.0));
            assert_eq!(calc.authority(b, b, Direction::Decreasing), Ok(0.0));
        }
    }

    #[test]
    fn sums_blocks_left_behind() {
        let t = loop_line();
        let calc = AuthorityCalculator::new(&t);
        let mut last = 0.0;
        for end in 1..4 {
            let a = calc.authority(0, end, Direction::Increasing).unwrap();
            assert!(a > last);
            last = a;
        }
        assert_eq!(calc.authority(0, 3, Direction::Increasing), Ok(60.0));
        // wraps through the jump edge
        assert_eq!(calc.authority(2, 1, Direction::Increasing), Ok(30.0 + 40.0 + 10.0));
        // one-way section overrides the requested direction
        assert_eq!(calc.authority(0, 2, Direction::Decreasing), Ok(30.0));
        // bidirectional section keeps it
        assert_eq!(calc.authority(5, 4, Direction::Decreasing), Ok(60.0));
    }

    #[test]
    fn unreachable_target_is_an_error() {
        let t = loop_line();
        let calc = AuthorityCalculator::new(&t);
        match calc.authority(0, 5, Direction::Increasing) {
            Err(AuthorityError::NonTermination { steps, .. }) => assert_eq!(steps, 13),
            x => panic!("expected non-termination, got {:?}", x),
        }
        assert_eq!(calc.authority(5, 0, Direction::Increasing),
                   Err(AuthorityError::Topology(
                       TopologyError::NoNeighbor("B6".to_string(), Direction::Increasing))));
        assert_eq!(calc.authority(0, 99, Direction::Increasing),
                   Err(AuthorityError::Topology(TopologyError::OutOfRange(99, 6))));
    }

    #[test]
    fn clamp_cuts_authority_short() {
        let t = loop_line();
        let mut s = DynamicTrackState::new(&t);
        s.territory(&t, 1).set_clamp(2, true).unwrap();
        let calc = AuthorityCalculator::new(&t);
        let a = calc.protected_authority(0, 3, Direction::Increasing, &s).unwrap();
        assert_eq!(a, Authority { distance: 30.0, limited_by: Some(2) });
        assert_eq!(calc.authority(0, 3, Direction::Increasing), Ok(60.0));
    }
}
