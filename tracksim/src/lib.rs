pub mod config;
pub mod input;
pub mod output;
pub mod eventsim;
pub mod railway;

use std::path::Path;

use crate::config::SimConfig;
use crate::input::dispatch::{self, Dispatch, DispatchAction};
use crate::input::topology::{TerritoryId, TrackTopology};
use crate::railway::sim::{CommandError, TrackSimulation, TrackWorld};

pub type AppResult<T> = Result<T, failure::Error>;

/// A rule program for one territory's wayside controller.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub territory: TerritoryId,
    pub name: String,
    pub source: String,
}

/// Runs a dispatch plan against a topology. Rule programs are loaded and
/// started before the first action; a rejected program is an error.
/// Actions that fail at run time are recorded in the history and the run
/// continues.
pub fn evaluate_dispatch(topology: TrackTopology,
                         programs: &[ProgramSource],
                         dispatch: &Dispatch,
                         config: SimConfig) -> AppResult<TrackWorld> {
    let mut world = TrackWorld::new(topology, config)?;
    for p in programs {
        world.load_program(0.0, p.territory, &p.name, &p.source)?;
    }

    let mut sim = TrackSimulation::new(world);
    for action in &dispatch.actions {
        if let DispatchAction::Wait(dt) = *action {
            sim.advance_by(dt);
            continue;
        }
        let time = sim.time();
        let world = sim.world_mut();
        if let Err(e) = apply(world, time, action) {
            world.reject(time, &format!("{:?}", action), &e);
        }
    }
    Ok(sim.into_world())
}

fn apply(world: &mut TrackWorld, time: f64, action: &DispatchAction) -> Result<(), CommandError> {
    use crate::input::dispatch::DispatchAction::*;
    match *action {
        Wait(_) => {}
        Train { ref name, ref block, speed, direction } => {
            world.spawn_train(time, name, block, speed, direction)?;
        }
        Speed(ref train, v) => world.set_speed(time, train, v)?,
        Suggest(ref block, v) => world.post_speed(block, v)?,
        Authority(ref train, ref target) => {
            world.dispatch_authority(time, train, target)?;
        }
        Maintenance(territory, on) => world.set_maintenance(time, territory, on)?,
        Override(territory, field, index, value) => world.set_override(territory, field, index, value)?,
        Fail(ref block) => world.set_failure(time, block, true)?,
        Repair(ref block) => world.set_failure(time, block, false)?,
    }
    Ok(())
}

pub fn read_file(f: &Path) -> AppResult<String> {
    use std::fs::File;
    use std::io::prelude::*;
    use std::io::BufReader;

    let file = File::open(f)?;
    let mut file = BufReader::new(&file);
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

pub fn get_topology(blocks: &Path, sections: &Path, jumps: Option<&Path>) -> AppResult<TrackTopology> {
    let blocks = read_file(blocks)?;
    let sections = read_file(sections)?;
    let jumps = match jumps {
        Some(p) => Some(read_file(p)?),
        None => None,
    };
    let topology = input::topology_parser::parse_topology(
        &blocks, &sections, jumps.as_ref().map(|s| s.as_str()))?;
    Ok(topology)
}

pub fn get_dispatch(s: &Path) -> AppResult<Dispatch> {
    let contents = read_file(s)?;
    let d = dispatch::parse_dispatch(&contents)?;
    Ok(d)
}

/// Reads a program argument of the form `territory=path`.
pub fn get_program(arg: &str) -> AppResult<ProgramSource> {
    let mut parts = arg.splitn(2, '=');
    let territory = parts.next().unwrap_or("").trim().parse::<TerritoryId>()
        .map_err(|_| failure::format_err!("expected territory=path, got \"{}\"", arg))?;
    let path = Path::new(parts.next()
        .ok_or_else(|| failure::format_err!("expected territory=path, got \"{}\"", arg))?);
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("program").to_string();
    Ok(ProgramSource { territory, name, source: read_file(path)? })
}
