use smallvec::SmallVec;
use failure::Fail;

use std::collections::{BTreeSet, HashMap};

pub type Dist = f64;

pub type BlockIdx = usize;
pub type SwitchIdx = usize;
pub type TerritoryId = usize;

pub type NameMap = HashMap<String, BlockIdx>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Increasing,
    Decreasing,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Increasing => Direction::Decreasing,
            Direction::Decreasing => Direction::Increasing,
        }
    }

    /// Index-arithmetic neighbor, `None` when stepping below zero.
    pub fn step(self, idx: BlockIdx) -> Option<BlockIdx> {
        match self {
            Direction::Increasing => idx.checked_add(1),
            Direction::Decreasing => idx.checked_sub(1),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectionDirection {
    Increasing,
    Decreasing,
    Bidirectional,
}

impl SectionDirection {
    /// Travel direction inside a section. One-way sections force their
    /// direction, bidirectional sections keep whatever the train had.
    pub fn resolve(self, current: Direction) -> Direction {
        match self {
            SectionDirection::Increasing => Direction::Increasing,
            SectionDirection::Decreasing => Direction::Decreasing,
            SectionDirection::Bidirectional => current,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub name: String,
    pub side: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub section: String,
    pub number: u32,
    pub length: Dist,
    pub speed_limit: f64,
    pub grade: f64,
    pub underground: bool,
    pub territories: SmallVec<[TerritoryId; 2]>,
    pub station: Option<Station>,
    pub switch: Option<SwitchIdx>,
    /// The switch whose branches converge on this block.
    pub switch_exit_of: Option<SwitchIdx>,
    pub light: bool,
    pub crossing: bool,
    pub beacon: Option<String>,
}

impl Block {
    pub fn has_station(&self) -> bool { self.station.is_some() }
    pub fn has_switch(&self) -> bool { self.switch.is_some() }
    pub fn is_switch_exit(&self) -> bool { self.switch_exit_of.is_some() }
    pub fn has_light(&self) -> bool { self.light }
    pub fn has_crossing(&self) -> bool { self.crossing }
    pub fn has_beacon(&self) -> bool { self.beacon.is_some() }

    pub fn has_devices(&self) -> bool {
        self.has_switch() || self.light || self.crossing
    }

    pub fn in_territory(&self, territory: TerritoryId) -> bool {
        self.territories.contains(&territory)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchDest {
    pub block: BlockIdx,
    pub territory: TerritoryId,
}

#[derive(Debug, Clone)]
pub struct Switch {
    pub entrance: BlockIdx,
    /// Indexed by switch position: `false` is position 0, `true` is position 1.
    pub positions: [SwitchDest; 2],
}

impl Switch {
    pub fn destination(&self, position: bool) -> SwitchDest {
        self.positions[position as usize]
    }

    pub fn position_of(&self, block: BlockIdx) -> Option<bool> {
        if self.positions[0].block == block {
            Some(false)
        } else if self.positions[1].block == block {
            Some(true)
        } else {
            None
        }
    }
}

pub type JumpEdges = HashMap<(BlockIdx, Direction), (BlockIdx, Direction)>;

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum TopologyError {
    #[fail(display = "unknown block \"{}\"", _0)]
    UnknownBlock(String),
    #[fail(display = "block index {} out of range (topology has {} blocks)", _0, _1)]
    OutOfRange(BlockIdx, usize),
    #[fail(display = "no block beyond \"{}\" going {:?}", _0, _1)]
    NoNeighbor(String, Direction),
    #[fail(display = "duplicate block id \"{}\"", _0)]
    DuplicateBlock(String),
    #[fail(display = "block \"{}\" is in unknown section \"{}\"", _0, _1)]
    UnknownSection(String, String),
    #[fail(display = "switch at \"{}\" must have exactly two destinations, found {}", _0, _1)]
    SwitchArity(String, usize),
    #[fail(display = "switch exit \"{}\" names \"{}\", which has no switch leading to it", _0, _1)]
    BadSwitchExit(String, String),
    #[fail(display = "block \"{}\" carries devices but is shared by territories {:?}", _0, _1)]
    SharedDeviceBlock(String, Vec<TerritoryId>),
    #[fail(display = "block \"{}\" belongs to no territory", _0)]
    NoTerritory(String),
    #[fail(display = "block \"{}\" has length {}; lengths must be positive and finite", _0, _1)]
    BadLength(String, Dist),
    #[fail(display = "unknown territory {}", _0)]
    UnknownTerritory(TerritoryId),
}

/// Immutable track graph. Blocks live in an arena ordered as imported;
/// the default adjacency is the arena index plus or minus one, overridden
/// by jump edges at wrap-around and yard points.
#[derive(Debug)]
pub struct TrackTopology {
    blocks: Vec<Block>,
    sections: HashMap<String, SectionDirection>,
    switches: Vec<Switch>,
    jumps: JumpEdges,
    names: NameMap,
    yard: Option<BlockIdx>,
}

impl TrackTopology {
    pub fn len(&self) -> usize { self.blocks.len() }
    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }
    pub fn blocks(&self) -> &[Block] { &self.blocks }
    pub fn switches(&self) -> &[Switch] { &self.switches }
    pub fn jumps(&self) -> &JumpEdges { &self.jumps }
    pub fn yard(&self) -> Option<BlockIdx> { self.yard }

    pub fn block_at(&self, idx: BlockIdx) -> Result<&Block, TopologyError> {
        self.blocks.get(idx).ok_or(TopologyError::OutOfRange(idx, self.blocks.len()))
    }

    pub fn lookup(&self, name: &str) -> Result<BlockIdx, TopologyError> {
        self.names.get(name).cloned()
            .ok_or_else(|| TopologyError::UnknownBlock(name.to_string()))
    }

    /// Block name for log output; never fails.
    pub fn name(&self, idx: BlockIdx) -> &str {
        self.blocks.get(idx).map(|b| b.name.as_str()).unwrap_or("?")
    }

    pub fn jump(&self, idx: BlockIdx, dir: Direction) -> Option<(BlockIdx, Direction)> {
        self.jumps.get(&(idx, dir)).cloned()
    }

    /// Next block (and the travel direction after the step) leaving `idx`
    /// in direction `dir`.
    pub fn neighbor(&self, idx: BlockIdx, dir: Direction) -> Result<(BlockIdx, Direction), TopologyError> {
        let block = self.block_at(idx)?;
        if let Some(jump) = self.jump(idx, dir) {
            return Ok(jump);
        }
        match dir.step(idx) {
            Some(next) if next < self.blocks.len() => Ok((next, dir)),
            _ => Err(TopologyError::NoNeighbor(block.name.clone(), dir)),
        }
    }

    pub fn switch_for(&self, idx: BlockIdx) -> Result<Option<&Switch>, TopologyError> {
        Ok(self.block_at(idx)?.switch.map(|sw| &self.switches[sw]))
    }

    pub fn switch_feeding(&self, idx: BlockIdx) -> Result<Option<&Switch>, TopologyError> {
        Ok(self.block_at(idx)?.switch_exit_of.map(|sw| &self.switches[sw]))
    }

    pub fn section_direction(&self, idx: BlockIdx) -> Result<SectionDirection, TopologyError> {
        let block = self.block_at(idx)?;
        self.sections.get(&block.section).cloned()
            .ok_or_else(|| TopologyError::UnknownSection(block.name.clone(), block.section.clone()))
    }

    pub fn territories(&self) -> Vec<TerritoryId> {
        let set: BTreeSet<TerritoryId> = self.blocks.iter()
            .flat_map(|b| b.territories.iter().cloned())
            .collect();
        set.into_iter().collect()
    }

    /// Blocks of one territory, in arena order.
    pub fn territory_blocks(&self, territory: TerritoryId) -> Vec<BlockIdx> {
        self.blocks.iter().enumerate()
            .filter(|(_, b)| b.in_territory(territory))
            .map(|(i, _)| i)
            .collect()
    }
}

/// One imported block row, with references to other blocks still by name.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub section: String,
    pub number: u32,
    pub length: Dist,
    pub speed_limit: f64,
    pub grade: f64,
    pub underground: bool,
    pub territories: SmallVec<[TerritoryId; 2]>,
    pub station: Option<Station>,
    pub switch_to: Vec<String>,
    pub switch_exit: Option<String>,
    pub light: bool,
    pub crossing: bool,
    pub beacon: Option<String>,
}

impl BlockSpec {
    pub fn new(section: &str, number: u32, length: Dist) -> BlockSpec {
        BlockSpec {
            section: section.to_string(),
            number,
            length,
            speed_limit: 70.0,
            grade: 0.0,
            underground: false,
            territories: SmallVec::new(),
            station: None,
            switch_to: Vec::new(),
            switch_exit: None,
            light: false,
            crossing: false,
            beacon: None,
        }
    }

    pub fn name(&self) -> String {
        format!("{}{}", self.section, self.number)
    }

    pub fn territory(mut self, t: TerritoryId) -> Self {
        self.territories.push(t);
        self
    }

    pub fn switch_to(mut self, pos0: &str, pos1: &str) -> Self {
        self.switch_to = vec![pos0.to_string(), pos1.to_string()];
        self
    }

    pub fn switch_exit(mut self, entrance: &str) -> Self {
        self.switch_exit = Some(entrance.to_string());
        self
    }

    pub fn light(mut self) -> Self { self.light = true; self }
    pub fn crossing(mut self) -> Self { self.crossing = true; self }

    pub fn beacon(mut self, payload: &str) -> Self {
        self.beacon = Some(payload.to_string());
        self
    }

    pub fn station(mut self, name: &str) -> Self {
        self.station = Some(Station { name: name.to_string(), side: None });
        self
    }
}

#[derive(Debug, Default)]
pub struct TopologyBuilder {
    blocks: Vec<BlockSpec>,
    sections: HashMap<String, SectionDirection>,
    jumps: Vec<(String, Direction, String, Direction)>,
}

impl TopologyBuilder {
    pub fn new() -> Self { Default::default() }

    pub fn section(mut self, name: &str, dir: SectionDirection) -> Self {
        self.sections.insert(name.to_string(), dir);
        self
    }

    pub fn block(mut self, spec: BlockSpec) -> Self {
        self.blocks.push(spec);
        self
    }

    pub fn jump(mut self, from: &str, dir: Direction, to: &str, next_dir: Direction) -> Self {
        self.jumps.push((from.to_string(), dir, to.to_string(), next_dir));
        self
    }

    pub fn add_section(&mut self, name: &str, dir: SectionDirection) {
        self.sections.insert(name.to_string(), dir);
    }

    pub fn add_block(&mut self, spec: BlockSpec) {
        self.blocks.push(spec);
    }

    pub fn add_jump(&mut self, from: &str, dir: Direction, to: &str, next_dir: Direction) {
        self.jumps.push((from.to_string(), dir, to.to_string(), next_dir));
    }

    pub fn build(self) -> Result<TrackTopology, TopologyError> {
        let mut names = NameMap::new();
        let mut by_number: HashMap<u32, BlockIdx> = HashMap::new();
        for (idx, spec) in self.blocks.iter().enumerate() {
            let name = spec.name();
            if names.insert(name.clone(), idx).is_some() {
                return Err(TopologyError::DuplicateBlock(name));
            }
            by_number.entry(spec.number).or_insert(idx);
            if !self.sections.contains_key(&spec.section) {
                return Err(TopologyError::UnknownSection(name, spec.section.clone()));
            }
            if spec.territories.is_empty() {
                return Err(TopologyError::NoTerritory(name));
            }
            // The yard despawns whatever enters it, so its length is never walked.
            let walked = spec.number != 0;
            if walked && !(spec.length > 0.0 && spec.length.is_finite()) {
                return Err(TopologyError::BadLength(name, spec.length));
            }
            let has_devices = !spec.switch_to.is_empty() || spec.light || spec.crossing;
            if has_devices && spec.territories.len() > 1 {
                return Err(TopologyError::SharedDeviceBlock(name, spec.territories.to_vec()));
            }
        }

        // Switch and jump references may name a block by its full id ("A12")
        // or, when unambiguous within the line, by its number alone ("12").
        let resolve = |r: &str| -> Result<BlockIdx, TopologyError> {
            let r = r.trim();
            if let Some(idx) = names.get(r) {
                return Ok(*idx);
            }
            r.parse::<u32>().ok()
                .and_then(|n| by_number.get(&n).cloned())
                .ok_or_else(|| TopologyError::UnknownBlock(r.to_string()))
        };

        let mut blocks = Vec::with_capacity(self.blocks.len());
        let mut switches = Vec::new();
        for (idx, spec) in self.blocks.iter().enumerate() {
            let switch = if spec.switch_to.is_empty() {
                None
            } else {
                if spec.switch_to.len() != 2 {
                    return Err(TopologyError::SwitchArity(spec.name(), spec.switch_to.len()));
                }
                let dest = |r: &str| -> Result<SwitchDest, TopologyError> {
                    let block = resolve(r)?;
                    Ok(SwitchDest { block, territory: self.blocks[block].territories[0] })
                };
                switches.push(Switch {
                    entrance: idx,
                    positions: [dest(&spec.switch_to[0])?, dest(&spec.switch_to[1])?],
                });
                Some(switches.len() - 1)
            };

            blocks.push(Block {
                name: spec.name(),
                section: spec.section.clone(),
                number: spec.number,
                length: spec.length,
                speed_limit: spec.speed_limit,
                grade: spec.grade,
                underground: spec.underground,
                territories: spec.territories.clone(),
                station: spec.station.clone(),
                switch,
                switch_exit_of: None,
                light: spec.light,
                crossing: spec.crossing,
                beacon: spec.beacon.clone(),
            });
        }

        for (idx, spec) in self.blocks.iter().enumerate() {
            if let Some(ref entrance) = spec.switch_exit {
                let entrance_idx = resolve(entrance)?;
                let sw = blocks[entrance_idx].switch
                    .filter(|sw| switches[*sw].position_of(idx).is_some())
                    .ok_or_else(|| TopologyError::BadSwitchExit(spec.name(), entrance.clone()))?;
                blocks[idx].switch_exit_of = Some(sw);
            }
        }

        let mut jumps = JumpEdges::new();
        for (from, dir, to, next_dir) in &self.jumps {
            jumps.insert((resolve(from)?, *dir), (resolve(to)?, *next_dir));
        }

        let yard = blocks.iter().position(|b| b.number == 0);

        Ok(TrackTopology {
            blocks,
            sections: self.sections,
            switches,
            jumps,
            names,
            yard,
        })
    }
}
