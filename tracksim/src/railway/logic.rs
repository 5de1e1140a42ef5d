//! Control-logic plug-in contract for wayside controllers.

use failure::Fail;
use std::fmt;

use crate::input::rule_parser::{RuleProgram, Expr, VecRef, Target, BinOp};

/// Element type of plug-in output. Only `Bool` satisfies the output
/// contract; anything else is rejected at load or scan time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            Value::Int(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value { Value::Bool(b) }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{} (int)", i),
        }
    }
}

/// One scan's inputs, indexed by territory-local block position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogicInputs {
    pub block_occupancies: Vec<bool>,
    pub switch_positions: Vec<bool>,
    pub light_signals: Vec<bool>,
    pub crossing_signals: Vec<bool>,
    pub previous_occupancies: Vec<bool>,
    pub exit_blocks: Vec<bool>,
    pub clamps: Vec<bool>,
}

impl LogicInputs {
    pub fn all_false(n: usize) -> LogicInputs {
        LogicInputs {
            block_occupancies: vec![false; n],
            switch_positions: vec![false; n],
            light_signals: vec![false; n],
            crossing_signals: vec![false; n],
            previous_occupancies: vec![false; n],
            exit_blocks: vec![false; n],
            clamps: vec![false; n],
        }
    }

    pub fn len(&self) -> usize { self.block_occupancies.len() }
    pub fn is_empty(&self) -> bool { self.block_occupancies.is_empty() }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogicOutputs {
    pub switch_positions: Vec<Value>,
    pub light_signals: Vec<Value>,
    pub crossing_signals: Vec<Value>,
    pub clamps: Vec<Value>,
}

impl LogicOutputs {
    pub fn from_bools(switch_positions: &[bool], light_signals: &[bool],
                      crossing_signals: &[bool], clamps: &[bool]) -> LogicOutputs {
        let conv = |v: &[bool]| v.iter().map(|b| Value::Bool(*b)).collect();
        LogicOutputs {
            switch_positions: conv(switch_positions),
            light_signals: conv(light_signals),
            crossing_signals: conv(crossing_signals),
            clamps: conv(clamps),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatedOutputs {
    pub switch_positions: Vec<bool>,
    pub light_signals: Vec<bool>,
    pub crossing_signals: Vec<bool>,
    pub clamps: Vec<bool>,
}

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum ContractViolation {
    #[fail(display = "{} has {} elements, expected {}", vector, found, expected)]
    Length { vector: &'static str, expected: usize, found: usize },
    #[fail(display = "{}[{}] is {}, expected a boolean", vector, index, found)]
    NotBoolean { vector: &'static str, index: usize, found: Value },
}

/// Checks lengths and element types of logic output for a territory of
/// `n` blocks.
pub fn validate(outputs: &LogicOutputs, n: usize) -> Result<ValidatedOutputs, ContractViolation> {
    fn check(vector: &'static str, v: &[Value], n: usize) -> Result<Vec<bool>, ContractViolation> {
        if v.len() != n {
            return Err(ContractViolation::Length { vector, expected: n, found: v.len() });
        }
        v.iter().enumerate()
            .map(|(index, x)| x.as_bool()
                 .ok_or(ContractViolation::NotBoolean { vector, index, found: *x }))
            .collect()
    }

    Ok(ValidatedOutputs {
        switch_positions: check("switch_positions", &outputs.switch_positions, n)?,
        light_signals: check("light_signals", &outputs.light_signals, n)?,
        crossing_signals: check("crossing_signals", &outputs.crossing_signals, n)?,
        clamps: check("clamps", &outputs.clamps, n)?,
    })
}

/// Upper bound on the number of memory latches a controller holds.
pub const MAX_MEMORY: usize = 1024;

/// User-supplied wayside logic.
///
/// Logic is a function of its inputs and of `memory`, a controller-owned
/// vector of `memory_size()` latches. Implementations must not keep other
/// state between calls; everything that persists is visible on the
/// controller.
pub trait ControlLogic {
    fn name(&self) -> &str;

    fn memory_size(&self) -> usize { 0 }

    /// Largest territory-local index the logic refers to, if known, so that
    /// a program written for a larger territory is rejected at load.
    fn max_block_index(&self) -> Option<usize> { None }

    fn evaluate(&self, inputs: &LogicInputs, memory: &mut [bool]) -> LogicOutputs;
}

/// Adapts a closure to `ControlLogic`.
pub struct LogicFn<F> {
    name: String,
    memory_size: usize,
    f: F,
}

impl<F> LogicFn<F> where F: Fn(&LogicInputs, &mut [bool]) -> LogicOutputs {
    pub fn new(name: &str, f: F) -> Self {
        LogicFn { name: name.to_string(), memory_size: 0, f }
    }

    pub fn with_memory(mut self, size: usize) -> Self {
        self.memory_size = size;
        self
    }
}

impl<F> ControlLogic for LogicFn<F> where F: Fn(&LogicInputs, &mut [bool]) -> LogicOutputs {
    fn name(&self) -> &str { &self.name }
    fn memory_size(&self) -> usize { self.memory_size }
    fn evaluate(&self, inputs: &LogicInputs, memory: &mut [bool]) -> LogicOutputs {
        (self.f)(inputs, memory)
    }
}

/// Pass-through logic: keeps every output at its input value, no clamps.
pub struct HoldLogic;

impl ControlLogic for HoldLogic {
    fn name(&self) -> &str { "hold" }
    fn evaluate(&self, inputs: &LogicInputs, _memory: &mut [bool]) -> LogicOutputs {
        LogicOutputs::from_bools(&inputs.switch_positions, &inputs.light_signals,
                                 &inputs.crossing_signals, &vec![false; inputs.len()])
    }
}

impl ControlLogic for RuleProgram {
    fn name(&self) -> &str { &self.name }

    fn memory_size(&self) -> usize { RuleProgram::memory_size(self) }

    fn max_block_index(&self) -> Option<usize> { RuleProgram::max_block_index(self) }

    /// Statements run in order. Reads see the scan inputs, except `mem`,
    /// which sees earlier writes of the same scan. Outputs not assigned
    /// keep their input value; clamps default to released.
    fn evaluate(&self, inputs: &LogicInputs, memory: &mut [bool]) -> LogicOutputs {
        let mut out = LogicOutputs::from_bools(&inputs.switch_positions, &inputs.light_signals,
                                               &inputs.crossing_signals, &vec![false; inputs.len()]);
        for stmt in &self.statements {
            let value = eval(&stmt.expr, inputs, memory);
            let vec = match stmt.target {
                Target::Switch => &mut out.switch_positions,
                Target::Light => &mut out.light_signals,
                Target::Crossing => &mut out.crossing_signals,
                Target::Clamp => &mut out.clamps,
                Target::Memory => {
                    if let (Some(m), Value::Bool(b)) = (memory.get_mut(stmt.index), value) {
                        *m = b;
                    }
                    continue;
                }
            };
            // Writing past the territory grows the vector, which the
            // output contract then rejects.
            if stmt.index >= vec.len() {
                vec.resize(stmt.index + 1, Value::Bool(false));
            }
            vec[stmt.index] = value;
        }
        out
    }
}

fn read<'a>(vec: VecRef, inputs: &'a LogicInputs, memory: &'a [bool]) -> &'a [bool] {
    match vec {
        VecRef::Occupancy => &inputs.block_occupancies,
        VecRef::Previous => &inputs.previous_occupancies,
        VecRef::Switch => &inputs.switch_positions,
        VecRef::Light => &inputs.light_signals,
        VecRef::Crossing => &inputs.crossing_signals,
        VecRef::Exit => &inputs.exit_blocks,
        VecRef::Clamp => &inputs.clamps,
        VecRef::Memory => memory,
    }
}

fn eval(e: &Expr, inputs: &LogicInputs, memory: &[bool]) -> Value {
    match *e {
        Expr::Bool(b) => Value::Bool(b),
        Expr::Int(i) => Value::Int(i),
        Expr::Index(vec, i) => Value::Bool(read(vec, inputs, memory).get(i).cloned().unwrap_or(false)),
        Expr::Count(vec, from, to) => {
            let v = read(vec, inputs, memory);
            let n = (from..to).filter(|i| v.get(*i).cloned().unwrap_or(false)).count();
            Value::Int(n as i64)
        }
        Expr::Not(ref a) => match eval(a, inputs, memory) {
            Value::Bool(b) => Value::Bool(!b),
            x => x,
        },
        Expr::Neg(ref a) => match eval(a, inputs, memory) {
            Value::Int(i) => Value::Int(-i),
            x => x,
        },
        Expr::Binary(op, ref a, ref b) => {
            let (a, b) = (eval(a, inputs, memory), eval(b, inputs, memory));
            match (op, a, b) {
                (BinOp::Or, Value::Bool(x), Value::Bool(y)) => Value::Bool(x || y),
                (BinOp::Xor, Value::Bool(x), Value::Bool(y)) => Value::Bool(x ^ y),
                (BinOp::And, Value::Bool(x), Value::Bool(y)) => Value::Bool(x && y),
                (BinOp::Eq, x, y) => Value::Bool(x == y),
                (BinOp::Ne, x, y) => Value::Bool(x != y),
                (BinOp::Lt, Value::Int(x), Value::Int(y)) => Value::Bool(x < y),
                (BinOp::Gt, Value::Int(x), Value::Int(y)) => Value::Bool(x > y),
                (BinOp::Le, Value::Int(x), Value::Int(y)) => Value::Bool(x <= y),
                (BinOp::Ge, Value::Int(x), Value::Int(y)) => Value::Bool(x >= y),
                (BinOp::Add, Value::Int(x), Value::Int(y)) => Value::Int(x.saturating_add(y)),
                (BinOp::Sub, Value::Int(x), Value::Int(y)) => Value::Int(x.saturating_sub(y)),
                // Ruled out by the type check at parse time.
                _ => Value::Bool(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::rule_parser::parse_rules;

    #[test]
    fn validate_checks_length_and_type() {
        let ok = LogicOutputs::from_bools(&[true, false], &[false, false], &[false, false], &[true, true]);
        assert_eq!(validate(&ok, 2).unwrap().clamps, vec![true, true]);
        assert_eq!(validate(&ok, 3),
                   Err(ContractViolation::Length { vector: "switch_positions", expected: 3, found: 2 }));

        let mut bad = ok.clone();
        bad.light_signals[1] = Value::Int(1);
        assert_eq!(validate(&bad, 2),
                   Err(ContractViolation::NotBoolean { vector: "light_signals", index: 1, found: Value::Int(1) }));
    }

    #[test]
    fn rules_evaluate_over_inputs() {
        let p = parse_rules("crossing", "
            crossing[1] = occ[0] | occ[2];
            light[0] = !(count(occ[0..3]) >= 2);
            clamp[2] = occ[2] & prev[2];
        ").unwrap();
        let mut inputs = LogicInputs::all_false(3);
        inputs.block_occupancies = vec![true, false, true];
        inputs.previous_occupancies = vec![false, false, true];
        inputs.switch_positions = vec![false, true, false];
        let out = validate(&p.evaluate(&inputs, &mut []), 3).unwrap();
        assert_eq!(out.crossing_signals, vec![false, true, false]);
        assert_eq!(out.light_signals, vec![false, false, false]);
        assert_eq!(out.clamps, vec![false, false, true]);
        // unassigned outputs pass through
        assert_eq!(out.switch_positions, vec![false, true, false]);
    }

    #[test]
    fn memory_latches_between_scans() {
        let p = parse_rules("latch", "mem[0] = mem[0] | occ[0]; switch[1] = mem[0];").unwrap();
        let mut memory = vec![false; p.memory_size()];
        let mut inputs = LogicInputs::all_false(2);
        inputs.block_occupancies[0] = true;
        p.evaluate(&inputs, &mut memory);
        inputs.block_occupancies[0] = false;
        let out = validate(&p.evaluate(&inputs, &mut memory), 2).unwrap();
        assert_eq!(memory, vec![true]);
        assert_eq!(out.switch_positions, vec![false, true]);
    }

    #[test]
    fn out_of_range_write_breaks_contract() {
        let p = parse_rules("wide", "light[4] = true;").unwrap();
        let out = p.evaluate(&LogicInputs::all_false(2), &mut []);
        assert_eq!(validate(&out, 2),
                   Err(ContractViolation::Length { vector: "light_signals", expected: 2, found: 5 }));
    }
}
