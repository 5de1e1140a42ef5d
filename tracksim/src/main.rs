use log::{info, LevelFilter};
use std::path::PathBuf;
use structopt::StructOpt;

use tracksim::*;
use tracksim::config::SimConfig;

/// Tracksim -- rail line safety core simulation
#[derive(StructOpt, Debug)]
#[structopt(name = "tracksim")]
struct Opt {
    /// Verbose mode (-v, -vv)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,

    /// Block table (CSV)
    #[structopt(parse(from_os_str))]
    blocks: PathBuf,

    /// Section direction table (CSV)
    #[structopt(parse(from_os_str))]
    sections: PathBuf,

    /// Dispatch file in the Tracksim dispatch format
    #[structopt(parse(from_os_str))]
    dispatch: PathBuf,

    /// Jump edge table (CSV)
    #[structopt(long = "jumps", parse(from_os_str))]
    jumps: Option<PathBuf>,

    /// Wayside rule program for a territory, as territory=path
    #[structopt(short = "p", long = "program")]
    programs: Vec<String>,

    /// Output JSON history file
    #[structopt(short = "j", long = "json", parse(from_os_str))]
    json: Option<PathBuf>,

    /// Output block visit times to file
    #[structopt(short = "n", long = "visits", parse(from_os_str))]
    visits: Option<PathBuf>,

    /// Movement time step in seconds
    #[structopt(short = "d", long = "time-step")]
    timestep: Option<f64>,

    /// PLC scan rate in Hz
    #[structopt(long = "scan-hz")]
    scan_hz: Option<f64>,
}

fn run(opt: &Opt) -> AppResult<()> {
    let topology = get_topology(&opt.blocks, &opt.sections, opt.jumps.as_ref().map(|p| p.as_path()))?;
    info!("Loaded {} blocks in territories {:?}", topology.len(), topology.territories());
    if opt.verbose >= 2 {
        println!("Topology:");
        for b in topology.blocks() {
            println!("  * {:?}", b);
        }
    }

    let programs = opt.programs.iter().map(|p| get_program(p)).collect::<AppResult<Vec<_>>>()?;

    let dispatch = get_dispatch(&opt.dispatch)?;
    if opt.verbose >= 1 {
        println!("Dispatch:");
        for x in &dispatch.actions { println!("  - {:?}", x); }
        println!();
    }

    let mut config = SimConfig::default();
    if let Some(dt) = opt.timestep {
        config.movement_hz = 1.0 / dt;
    }
    if let Some(hz) = opt.scan_hz {
        config.scan_hz = hz;
    }

    let world = evaluate_dispatch(topology, &programs, &dispatch, config)?;
    let history = &world.history;

    println!("# Track history:");
    for (t, x) in &history.track {
        println!("> {:8.2} {:?}", t, x);
    }
    for train in history.trains.values() {
        println!("## Train \"{}\":", train.name);
        for (t, x) in &train.events {
            println!("> {:8.2} {:?}", t, x);
        }
    }

    let faults = history.faults().count();
    if faults > 0 {
        println!("# {} fault(s) recorded", faults);
    }

    if let Some(ref json) = opt.json {
        use std::fs::File;
        use std::io::BufWriter;
        let file = File::create(json)?;
        let mut writer = BufWriter::new(&file);
        tracksim::output::json::json_history(&world.topology, history, &mut writer)?;
    }

    if let Some(ref visits) = opt.visits {
        use std::fs::File;
        use std::io::{BufWriter, Write};
        let file = File::create(visits)?;
        let mut writer = BufWriter::new(&file);
        let string = tracksim::output::history::visits(&world.topology, history)?;
        write!(writer, "{}", string)?;
    }

    Ok(())
}

pub fn main() {
    let opt = Opt::from_args();
    let level = match opt.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(&opt) {
        Ok(()) => {},
        Err(e) => {
            println!("Error:\n{}", e.as_fail());
            std::process::exit(1);
        },
    }
}
