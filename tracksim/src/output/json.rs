use failure::Error;
use super::history::{History, TrackLogEvent, TrainLogEvent};
use crate::input::topology::TrackTopology;

use std::io;

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// JSON has no NaN or infinity; those are written as `null`.
fn number(x: f64) -> String {
    if x.is_finite() { x.to_string() } else { "null".to_string() }
}

fn event<W: io::Write>(f: &mut W, first: &mut bool, t: f64, e: &str, r: &str, v: &str)
    -> Result<(), Error> {
    if *first { *first = false; } else { write!(f, ", ")?; }
    write!(f,
           "{{ \"time\": {}, \"event\": \"{}\", \"ref\": \"{}\", \"value\": \"{}\" }}",
           number(t), e, escape(r), escape(v))?;
    Ok(())
}

fn flag(x: bool) -> &'static str {
    if x { "true" } else { "false" }
}

pub fn json_history<W: io::Write>(topology: &TrackTopology,
                                  history: &History,
                                  f: &mut W)
                                  -> Result<(), Error> {
    write!(f, "{{ \"topology\": {{\n")?;

    write!(f, "\"blocks\":{{")?;
    let mut first = true;
    for block in topology.blocks() {
        if first { first = false; } else { write!(f, ", ")?; }
        let territories = block.territories.iter()
            .map(|t| t.to_string()).collect::<Vec<_>>().join(", ");
        write!(f, "\"{}\": {{ \"section\": \"{}\", \"length\": {}, \"speed_limit\": {}, \
                   \"territories\": [{}] }}",
               escape(&block.name), escape(&block.section), number(block.length),
               number(block.speed_limit), territories)?;
    }
    write!(f, "}}}},\n")?;

    write!(f, "\"events\":[")?;
    let mut first = true;
    for &(t, ref ev) in &history.track {
        let name = |b| topology.name(b);
        use self::TrackLogEvent::*;
        match *ev {
            Occupied(b, x) => event(f, &mut first, t, "occupied", name(b), flag(x))?,
            Switch(b, x) => event(f, &mut first, t, "switch", name(b), if x { "1" } else { "0" })?,
            SwitchHeld(b, x) => event(f, &mut first, t, "switch_held", name(b), if x { "1" } else { "0" })?,
            Light(b, x) => event(f, &mut first, t, "light", name(b), if x { "green" } else { "red" })?,
            Crossing(b, x) => event(f, &mut first, t, "crossing", name(b), flag(x))?,
            Clamp(b, x) => event(f, &mut first, t, "clamp", name(b), flag(x))?,
            Program(territory, state) => {
                event(f, &mut first, t, "program", &territory.to_string(), &format!("{:?}", state))?
            }
            Fault(ref fault) => {
                let kind = if fault.is_safety_critical() { "safety_fault" } else { "fault" };
                event(f, &mut first, t, kind, "", &fault.to_string())?
            }
            Rejected(ref cmd) => event(f, &mut first, t, "rejected", "", cmd)?,
        }
    }
    write!(f, " ]")?;

    write!(f, ", \"trains\": {{ ")?;
    let mut firsttrain = true;
    for train in history.trains.values() {
        if firsttrain { firsttrain = false; } else { write!(f, ", ")?; }
        write!(f, " \"{}\": {{ \"events\":[", escape(&train.name))?;
        let mut first = true;
        for &(t, ref ev) in &train.events {
            let name = |b| topology.name(b);
            use self::TrainLogEvent::*;
            match *ev {
                Spawn(b) => event(f, &mut first, t, "spawn", name(b), "")?,
                Enter(b) => event(f, &mut first, t, "enter", name(b), "")?,
                Beacon(b, ref payload) => event(f, &mut first, t, "beacon", name(b), payload)?,
                Hold(b) => event(f, &mut first, t, "hold", name(b), "")?,
                Authority(a) => event(f, &mut first, t, "authority", "", &a.to_string())?,
                Speed(v) => event(f, &mut first, t, "speed", "", &v.to_string())?,
                EmergencyStop => event(f, &mut first, t, "emergency_stop", "", "")?,
                Despawn(b) => event(f, &mut first, t, "despawn", name(b), "")?,
            }
        }
        write!(f, " ] }}")?;
    }
    write!(f, " }} ")?;
    write!(f, " }}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::topology::*;

    #[test]
    fn test_json_shape() {
        let t = TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec::new("A", 1, 10.0).territory(1))
            .block(BlockSpec::new("A", 2, 10.0).territory(1).beacon("say \"hi\""))
            .build()
            .unwrap();
        let mut h = History::default();
        h.track_event(0.5, TrackLogEvent::Occupied(1, true));
        h.train_event(0.5, 0, "t1", TrainLogEvent::Beacon(1, "say \"hi\"".to_string()));

        let mut out = Vec::new();
        json_history(&t, &h, &mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("{ \"time\": 0.5, \"event\": \"occupied\", \"ref\": \"A2\", \"value\": \"true\" }"));
        assert!(s.contains("\"value\": \"say \\\"hi\\\"\""));
        assert!(s.contains("\"t1\": { \"events\":["));
    }

    #[test]
    fn non_finite_numbers_are_null() {
        let t = TopologyBuilder::new()
            .section("A", SectionDirection::Increasing)
            .block(BlockSpec { speed_limit: ::std::f64::INFINITY, ..BlockSpec::new("A", 1, 10.0).territory(1) })
            .build()
            .unwrap();
        let mut h = History::default();
        h.track_event(::std::f64::NAN, TrackLogEvent::Occupied(0, true));

        let mut out = Vec::new();
        json_history(&t, &h, &mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("\"length\": 10, \"speed_limit\": null"));
        assert!(s.contains("{ \"time\": null, \"event\": \"occupied\""));
        assert!(!s.contains("NaN") && !s.contains("inf"));
    }
}
