use failure::Fail;
use regex::Regex;

use std::collections::HashMap;

use super::topology::*;

#[derive(Debug, Fail)]
pub enum ImportError {
    #[fail(display = "error in regular expression: {}", _0)]
    RegexError(String),
    #[fail(display = "csv error: {}", _0)]
    Csv(#[cause] csv::Error),
    #[fail(display = "missing column \"{}\"", _0)]
    MissingColumn(String),
    #[fail(display = "row {}: {}", _0, _1)]
    Row(usize, String),
    #[fail(display = "{}", _0)]
    Topology(#[cause] TopologyError),
}

impl From<csv::Error> for ImportError {
    fn from(e: csv::Error) -> ImportError { ImportError::Csv(e) }
}

impl From<TopologyError> for ImportError {
    fn from(e: TopologyError) -> ImportError { ImportError::Topology(e) }
}

/// Builds a topology from the block table, the section table and an
/// optional jump table (all CSV with a header row).
///
/// Block table columns: `section,block,length,speed_limit,grade,underground,
/// territory,station,side,switch,switch_exit,light,crossing,beacon`. Only
/// `section`, `block`, `length` and `territory` are required.
///
/// ```text
/// section,block,length,territory,switch,light
/// A,1,100,1,,x
/// A,2,100,1,"B3;B4",
/// ```
pub fn parse_topology(blocks: &str, sections: &str, jumps: Option<&str>)
    -> Result<TrackTopology, ImportError> {
    let mut builder = TopologyBuilder::new();
    parse_sections(sections, &mut builder)?;
    parse_blocks(blocks, &mut builder)?;
    if let Some(jumps) = jumps {
        parse_jumps(jumps, &mut builder)?;
    }
    Ok(builder.build()?)
}

struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<csv::StringRecord>,
}

impl Table {
    fn read(input: &str) -> Result<Table, ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(input.as_bytes());
        let columns = reader.headers()?.iter().enumerate()
            .map(|(i, h)| (h.to_lowercase(), i))
            .collect();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Table { columns, rows })
    }

    fn require(&self, name: &str) -> Result<usize, ImportError> {
        self.columns.get(name).cloned().ok_or_else(|| ImportError::MissingColumn(name.to_string()))
    }

    /// Missing columns and cells read as empty.
    fn get<'a>(&self, row: &'a csv::StringRecord, name: &str) -> &'a str {
        self.columns.get(name).and_then(|i| row.get(*i)).unwrap_or("")
    }
}

/// Accepts `1/0`, `true/false`, `yes/no`, `y/n`, `x` and empty.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" => Some(false),
        "1" | "true" | "yes" | "y" | "x" => Some(true),
        _ => None,
    }
}

pub fn parse_section_direction(s: &str) -> Option<SectionDirection> {
    match s.trim().to_lowercase().as_str() {
        "increasing" | "+" => Some(SectionDirection::Increasing),
        "decreasing" | "-" => Some(SectionDirection::Decreasing),
        "bidirectional" | "both" => Some(SectionDirection::Bidirectional),
        _ => None,
    }
}

pub fn parse_direction(s: &str) -> Option<Direction> {
    match s.trim().to_lowercase().as_str() {
        "increasing" | "+" => Some(Direction::Increasing),
        "decreasing" | "-" => Some(Direction::Decreasing),
        _ => None,
    }
}

pub fn parse_sections(input: &str, builder: &mut TopologyBuilder) -> Result<(), ImportError> {
    let table = Table::read(input)?;
    let section = table.require("section")?;
    let direction = table.require("direction")?;
    for (i, row) in table.rows.iter().enumerate() {
        let name = row.get(section).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        let dir_str = row.get(direction).unwrap_or("");
        let dir = parse_section_direction(dir_str)
            .ok_or_else(|| ImportError::Row(i + 1, format!("unknown direction \"{}\"", dir_str)))?;
        builder.add_section(name, dir);
    }
    Ok(())
}

pub fn parse_blocks(input: &str, builder: &mut TopologyBuilder) -> Result<(), ImportError> {
    let block_re = Regex::new(r"^\s*(?P<section>[A-Za-z]*)\s*(?P<number>\d+)\s*$")
        .map_err(|e| ImportError::RegexError(format!("{:?}", e)))?;
    let table = Table::read(input)?;
    for name in &["section", "block", "length", "territory"] {
        table.require(name)?;
    }

    for (i, row) in table.rows.iter().enumerate() {
        let line = i + 1;
        let err = |msg: String| ImportError::Row(line, msg);
        let number_of = |s: &str| -> Result<f64, ImportError> {
            if s.is_empty() {
                return Ok(0.0);
            }
            s.parse::<f64>().map_err(|_| err(format!("bad number \"{}\"", s)))
        };
        let flag = |col: &str| -> Result<bool, ImportError> {
            let s = table.get(row, col);
            parse_bool(s).ok_or_else(|| err(format!("bad {} flag \"{}\"", col, s)))
        };

        let section = table.get(row, "section");
        let block = table.get(row, "block");
        if section.is_empty() && block.is_empty() {
            continue;
        }
        let groups = block_re.captures(block)
            .ok_or_else(|| err(format!("bad block id \"{}\"", block)))?;
        let number = groups["number"].parse::<u32>()
            .map_err(|_| err(format!("bad block number \"{}\"", block)))?;
        let section = if section.is_empty() { &groups["section"] } else { section };

        let length = table.get(row, "length");
        if length.is_empty() {
            return Err(err(format!("missing length for block \"{}\"", block)));
        }
        let mut spec = BlockSpec::new(section, number, number_of(length)?);
        if table.columns.contains_key("speed_limit") {
            spec.speed_limit = number_of(table.get(row, "speed_limit"))?;
        }
        spec.grade = number_of(table.get(row, "grade"))?;
        spec.underground = flag("underground")?;

        for t in table.get(row, "territory").split(',').map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let t = t.parse::<TerritoryId>()
                .map_err(|_| err(format!("bad territory \"{}\"", t)))?;
            spec = spec.territory(t);
        }

        let station = table.get(row, "station");
        if !station.is_empty() {
            let side = table.get(row, "side");
            spec.station = Some(Station {
                name: station.to_string(),
                side: if side.is_empty() { None } else { Some(side.to_string()) },
            });
        }

        let switch = table.get(row, "switch");
        if !switch.is_empty() {
            spec.switch_to = switch.split(';').map(|d| d.trim().to_string()).collect();
        }
        let exit = table.get(row, "switch_exit");
        if !exit.is_empty() {
            spec = spec.switch_exit(exit);
        }

        spec.light = flag("light")?;
        spec.crossing = flag("crossing")?;

        let beacon = table.get(row, "beacon");
        spec.beacon = match parse_bool(beacon) {
            Some(false) => None,
            Some(true) => Some(spec.name()),
            None => Some(beacon.to_string()),
        };

        builder.add_block(spec);
    }
    Ok(())
}

pub fn parse_jumps(input: &str, builder: &mut TopologyBuilder) -> Result<(), ImportError> {
    let table = Table::read(input)?;
    let cols = ["block", "direction", "next", "next_direction"];
    for name in &cols {
        table.require(name)?;
    }
    for (i, row) in table.rows.iter().enumerate() {
        let from = table.get(row, "block");
        if from.is_empty() {
            continue;
        }
        let dir = |col: &str| -> Result<Direction, ImportError> {
            let s = table.get(row, col);
            parse_direction(s).ok_or_else(|| ImportError::Row(i + 1, format!("unknown direction \"{}\"", s)))
        };
        builder.add_jump(from, dir("direction")?, table.get(row, "next"), dir("next_direction")?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTIONS: &str = "section,direction\nA,increasing\nB,both\nYARD,+\n";

    const BLOCKS: &str = "\
section,block,length,speed_limit,territory,station,side,switch,switch_exit,light,crossing,beacon
YARD,0,50,20,1,,,,,,,
A,1,100,50,1,,,,,,,
A,2,100,50,1,,,B3;B4,,x,,
B,3,80,40,1,Central,left,,A2,,,\"next: Central\"
B,4,80,40,\"1,2\",,,,,,,
B,5,80,40,2,,,,,,yes,
";

    const JUMPS: &str = "block,direction,next,next_direction\nB5,increasing,YARD0,increasing\n";

    #[test]
    fn test_parse_tables() {
        let t = parse_topology(BLOCKS, SECTIONS, Some(JUMPS)).unwrap();
        assert_eq!(t.len(), 6);
        assert_eq!(t.yard(), Some(0));

        let a2 = t.lookup("A2").unwrap();
        let sw = t.switch_for(a2).unwrap().unwrap();
        assert_eq!(sw.destination(false).block, t.lookup("B3").unwrap());
        assert_eq!(sw.destination(true).block, t.lookup("B4").unwrap());
        assert!(t.block_at(a2).unwrap().has_light());

        let b3 = t.block_at(t.lookup("B3").unwrap()).unwrap();
        assert!(b3.is_switch_exit());
        assert_eq!(b3.beacon, Some("next: Central".to_string()));
        assert_eq!(b3.station.as_ref().map(|s| s.name.as_str()), Some("Central"));
        assert_eq!(b3.speed_limit, 40.0);

        let b4 = t.block_at(t.lookup("B4").unwrap()).unwrap();
        assert_eq!(b4.territories.to_vec(), vec![1, 2]);
        assert!(t.block_at(t.lookup("B5").unwrap()).unwrap().has_crossing());

        assert_eq!(t.neighbor(t.lookup("B5").unwrap(), Direction::Increasing).unwrap(),
                   (0, Direction::Increasing));
        assert_eq!(t.section_direction(t.lookup("B4").unwrap()).unwrap(),
                   SectionDirection::Bidirectional);
    }

    #[test]
    fn test_parse_errors() {
        match parse_topology("section,block,length\nA,1,10\n", SECTIONS, None) {
            Err(ImportError::MissingColumn(c)) => assert_eq!(c, "territory"),
            x => panic!("unexpected {:?}", x.map(|t| t.len())),
        }
        match parse_topology("section,block,length,territory\nA,1,ten,1\n", SECTIONS, None) {
            Err(ImportError::Row(1, _)) => {}
            x => panic!("unexpected {:?}", x.map(|t| t.len())),
        }
        match parse_topology("section,block,length,territory\nC,1,10,1\n", SECTIONS, None) {
            Err(ImportError::Topology(TopologyError::UnknownSection(b, s))) => {
                assert_eq!((b.as_str(), s.as_str()), ("C1", "C"));
            }
            x => panic!("unexpected {:?}", x.map(|t| t.len())),
        }
        match parse_topology("section,block,length,territory\nA,1,,1\n", SECTIONS, None) {
            Err(ImportError::Row(1, _)) => {}
            x => panic!("unexpected {:?}", x.map(|t| t.len())),
        }
        match parse_topology("section,block,length,territory\nA,1,0,1\n", SECTIONS, None) {
            Err(ImportError::Topology(TopologyError::BadLength(b, _))) => assert_eq!(b, "A1"),
            x => panic!("unexpected {:?}", x.map(|t| t.len())),
        }
        assert!(parse_bool("maybe").is_none());
        assert_eq!(parse_section_direction("-"), Some(SectionDirection::Decreasing));
    }
}
