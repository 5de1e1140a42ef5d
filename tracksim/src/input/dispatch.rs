use failure::Fail;
use regex::Regex;

use super::topology::{Direction, TerritoryId};
use super::topology_parser::{parse_bool, parse_direction};
use crate::railway::wayside::OverrideField;

type TrainName = String;
type BlockName = String;

#[derive(Debug)]
pub struct Dispatch {
    pub actions: Vec<DispatchAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    Wait(f64),
    Train { name: TrainName, block: BlockName, speed: Option<f64>, direction: Option<Direction> },
    Speed(TrainName, f64),
    /// CTC suggested speed posted on a block.
    Suggest(BlockName, f64),
    Authority(TrainName, BlockName),
    Maintenance(TerritoryId, bool),
    Override(TerritoryId, OverrideField, usize, bool),
    Fail(BlockName),
    Repair(BlockName),
}

#[derive(Debug, Fail)]
pub enum ParseError {
    #[fail(display = "error in regular expression: {}", _0)]
    RegexError(String),
    #[fail(display = "error converting number")]
    NumberError,
    #[fail(display = "unrecognized dispatch: {}", _0)]
    Unrecognized(String),
}

/// Parses dispatch plan format
///
/// * wait 10.0
/// * train t1 A1 v=10.0 dir=increasing
/// * speed t1 5.0
/// * suggest A3 4.0
/// * authority t1 A5
/// * maintenance 1 on
/// * override 1 switch 3 true
/// * fail A4
/// * repair A4
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_dispatch(input: &str) -> Result<Dispatch, ParseError> {
    let re = |s: &str| Regex::new(s).map_err(|e| ParseError::RegexError(format!("{:?}", e)));
    let wait_re = re(r"^\s*wait\s+([\d\.]+)\s*$")?;
    let train_re = re(r"(?x) ^ \s* train \s+ (?P<name>\w+) \s+ (?P<block>\w+)
            (?: \s+ v \s* = \s* (?P<vel>[\d\.]+) )?
            (?: \s+ dir \s* = \s* (?P<dir>\w+|\+|-) )?
            \s* $")?;
    let speed_re = re(r"^\s*speed\s+(\w+)\s+([\d\.]+)\s*$")?;
    let suggest_re = re(r"^\s*suggest\s+(\w+)\s+([\d\.]+)\s*$")?;
    let authority_re = re(r"^\s*authority\s+(\w+)\s+(\w+)\s*$")?;
    let maintenance_re = re(r"^\s*maintenance\s+(\d+)\s+(on|off)\s*$")?;
    let override_re = re(r"(?x) ^ \s* override \s+ (?P<territory>\d+) \s+
            (?P<field>occupancy|switch|light|crossing) \s+ (?P<index>\d+) \s+ (?P<value>\w+) \s* $")?;
    let fail_re = re(r"^\s*(fail|repair)\s+(\w+)\s*$")?;

    let number = |s: &str| s.parse::<f64>().map_err(|_e| ParseError::NumberError);
    let index = |s: &str| s.parse::<usize>().map_err(|_e| ParseError::NumberError);

    let mut actions = Vec::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(groups) = wait_re.captures(line) {
            actions.push(DispatchAction::Wait(number(&groups[1])?));
            continue;
        }
        if let Some(groups) = train_re.captures(line) {
            let speed = match groups.name("vel") {
                Some(v) => Some(number(v.as_str())?),
                None => None,
            };
            let direction = match groups.name("dir") {
                Some(d) => Some(parse_direction(d.as_str())
                    .ok_or_else(|| ParseError::Unrecognized(line.to_string()))?),
                None => None,
            };
            actions.push(DispatchAction::Train {
                name: groups["name"].to_string(),
                block: groups["block"].to_string(),
                speed,
                direction,
            });
            continue;
        }
        if let Some(groups) = speed_re.captures(line) {
            actions.push(DispatchAction::Speed(groups[1].to_string(), number(&groups[2])?));
            continue;
        }
        if let Some(groups) = suggest_re.captures(line) {
            actions.push(DispatchAction::Suggest(groups[1].to_string(), number(&groups[2])?));
            continue;
        }
        if let Some(groups) = authority_re.captures(line) {
            actions.push(DispatchAction::Authority(groups[1].to_string(), groups[2].to_string()));
            continue;
        }
        if let Some(groups) = maintenance_re.captures(line) {
            actions.push(DispatchAction::Maintenance(index(&groups[1])?, &groups[2] == "on"));
            continue;
        }
        if let Some(groups) = override_re.captures(line) {
            let field = match &groups["field"] {
                "occupancy" => OverrideField::Occupancy,
                "switch" => OverrideField::Switch,
                "light" => OverrideField::Light,
                _ => OverrideField::Crossing,
            };
            let value = parse_bool(&groups["value"])
                .ok_or_else(|| ParseError::Unrecognized(line.to_string()))?;
            actions.push(DispatchAction::Override(index(&groups["territory"])?, field,
                                                  index(&groups["index"])?, value));
            continue;
        }
        if let Some(groups) = fail_re.captures(line) {
            let block = groups[2].to_string();
            actions.push(if &groups[1] == "fail" {
                DispatchAction::Fail(block)
            } else {
                DispatchAction::Repair(block)
            });
            continue;
        }
        return Err(ParseError::Unrecognized(line.to_string()));
    }

    Ok(Dispatch { actions })
}
