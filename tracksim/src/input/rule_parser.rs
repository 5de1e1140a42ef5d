//! Wayside rule programs.
//!
//! A program is a list of assignments to territory-local outputs:
//!
//! ```text
//! # hold the crossing down while either approach is occupied
//! crossing[4] = occ[3] | occ[5];
//! light[2]    = !occ[3] & !clamp[3];
//! switch[1]   = mem[0];
//! mem[0]      = count(occ[0..4]) > 1 | mem[0] & occ[2];
//! clamp[3]    = occ[2] & prev[2];
//! ```
//!
//! Readable vectors: `occ`, `prev`, `switch`, `light`, `crossing`, `exit`,
//! `clamp`, `mem`. Writable: `switch`, `light`, `crossing`, `clamp`, `mem`.

use failure::Fail;
use std::iter::Peekable;

use crate::railway::logic::MAX_MEMORY;

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum RuleParseError {
    #[fail(display = "unexpected character '{}' on line {}", _1, _0)]
    UnexpectedChar(usize, char),
    #[fail(display = "unexpected token {} at position {}", _1, _0)]
    UnexpectedToken(usize, String),
    #[fail(display = "unknown vector \"{}\"", _0)]
    UnknownVector(String),
    #[fail(display = "\"{}\" cannot be assigned", _0)]
    NotWritable(String),
    #[fail(display = "type error: {}", _0)]
    Type(String),
    #[fail(display = "memory index {} exceeds the limit of {} latches", _0, _1)]
    MemoryIndex(usize, usize),
}

// AST
//
//

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VecRef {
    Occupancy,
    Previous,
    Switch,
    Light,
    Crossing,
    Exit,
    Clamp,
    Memory,
}

impl VecRef {
    fn from_name(s: &str) -> Option<VecRef> {
        Some(match s {
            "occ" => VecRef::Occupancy,
            "prev" => VecRef::Previous,
            "switch" => VecRef::Switch,
            "light" => VecRef::Light,
            "crossing" => VecRef::Crossing,
            "exit" => VecRef::Exit,
            "clamp" => VecRef::Clamp,
            "mem" => VecRef::Memory,
            _ => return None,
        })
    }
}

const BLOCK_VECTORS: [VecRef; 7] = [VecRef::Occupancy, VecRef::Previous, VecRef::Switch,
                                   VecRef::Light, VecRef::Crossing, VecRef::Exit, VecRef::Clamp];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Switch,
    Light,
    Crossing,
    Clamp,
    Memory,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Bool(bool),
    Int(i64),
    Index(VecRef, usize),
    /// Number of true elements in `vec[from..to]`.
    Count(VecRef, usize, usize),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn ty(&self) -> Result<Type, RuleParseError> {
        use self::BinOp::*;
        match *self {
            Expr::Bool(_) | Expr::Index(..) => Ok(Type::Bool),
            Expr::Int(_) | Expr::Count(..) => Ok(Type::Int),
            Expr::Not(ref e) => {
                expect(e, Type::Bool, "!")?;
                Ok(Type::Bool)
            }
            Expr::Neg(ref e) => {
                expect(e, Type::Int, "unary -")?;
                Ok(Type::Int)
            }
            Expr::Binary(op, ref a, ref b) => match op {
                Or | Xor | And => {
                    expect(a, Type::Bool, "boolean operator")?;
                    expect(b, Type::Bool, "boolean operator")?;
                    Ok(Type::Bool)
                }
                Eq | Ne => {
                    if a.ty()? != b.ty()? {
                        return Err(RuleParseError::Type("comparing bool with int".to_string()));
                    }
                    Ok(Type::Bool)
                }
                Lt | Gt | Le | Ge => {
                    expect(a, Type::Int, "ordering")?;
                    expect(b, Type::Int, "ordering")?;
                    Ok(Type::Bool)
                }
                Add | Sub => {
                    expect(a, Type::Int, "arithmetic")?;
                    expect(b, Type::Int, "arithmetic")?;
                    Ok(Type::Int)
                }
            },
        }
    }

    fn max_index(&self, vec: VecRef) -> Option<usize> {
        match *self {
            Expr::Index(v, i) if v == vec => Some(i),
            Expr::Count(v, _, to) if v == vec && to > 0 => Some(to - 1),
            Expr::Not(ref e) | Expr::Neg(ref e) => e.max_index(vec),
            Expr::Binary(_, ref a, ref b) => a.max_index(vec).max(b.max_index(vec)),
            _ => None,
        }
    }
}

fn expect(e: &Expr, ty: Type, ctx: &str) -> Result<(), RuleParseError> {
    let found = e.ty()?;
    if found != ty {
        return Err(RuleParseError::Type(format!("{} expects {:?}, found {:?}", ctx, ty, found)));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub target: Target,
    pub index: usize,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuleProgram {
    pub name: String,
    pub statements: Vec<Assignment>,
}

impl RuleProgram {
    /// Highest block index any statement reads or writes (memory excluded).
    pub fn max_block_index(&self) -> Option<usize> {
        self.statements.iter()
            .flat_map(|s| {
                let written = if s.target == Target::Memory { None } else { Some(s.index) };
                BLOCK_VECTORS.iter().map(move |v| s.expr.max_index(*v)).chain(Some(written))
            })
            .max()
            .and_then(|x| x)
    }

    /// Highest memory index any statement reads or writes.
    pub fn max_memory_index(&self) -> Option<usize> {
        self.statements.iter()
            .flat_map(|s| {
                let written = if s.target == Target::Memory { Some(s.index) } else { None };
                Some(s.expr.max_index(VecRef::Memory)).into_iter().chain(Some(written))
            })
            .max()
            .and_then(|x| x)
    }

    pub fn memory_size(&self) -> usize {
        self.max_memory_index().map(|i| i.saturating_add(1)).unwrap_or(0)
    }
}

// LEXER
//
//

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Identifier(String),
    Number(i64),
    BracketOpen,
    BracketClose,
    ParensOpen,
    ParensClose,
    Range,
    Assign,
    EqEq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Not,
    And,
    Or,
    Xor,
    Plus,
    Minus,
    Semicolon,
    EOF,
}

pub fn lexer(x: &mut dyn Iterator<Item = char>) -> Result<Vec<Token>, RuleParseError> {
    let mut tokens = Vec::new();
    let mut input = x.peekable();
    let mut line = 1;
    while let Some(&ch) = input.peek() {
        match ch {
            x if x.is_ascii_digit() => {
                let num: String = consume_while(&mut input, |a| a.is_ascii_digit())
                    .into_iter().collect();
                let n = num.parse::<i64>()
                    .map_err(|_| RuleParseError::UnexpectedToken(tokens.len(), num.clone()))?;
                tokens.push(Token::Number(n));
            }
            x if x.is_alphabetic() || x == '_' => {
                let s: String = consume_while(&mut input, |a| a.is_alphanumeric() || a == '_')
                    .into_iter().collect();
                tokens.push(Token::Identifier(s));
            }
            '#' => {
                consume_while(&mut input, |a| a != '\n');
            }
            '\n' => {
                input.next();
                line += 1;
            }
            c if c.is_whitespace() => {
                input.next();
            }
            c => {
                input.next();
                tokens.push(match c {
                    '[' => Token::BracketOpen,
                    ']' => Token::BracketClose,
                    '(' => Token::ParensOpen,
                    ')' => Token::ParensClose,
                    ';' => Token::Semicolon,
                    '&' => { followed_by(&mut input, '&'); Token::And }
                    '|' => { followed_by(&mut input, '|'); Token::Or }
                    '^' => Token::Xor,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '.' => if followed_by(&mut input, '.') { Token::Range } else {
                        return Err(RuleParseError::UnexpectedChar(line, '.'));
                    },
                    '=' => if followed_by(&mut input, '=') { Token::EqEq } else { Token::Assign },
                    '!' => if followed_by(&mut input, '=') { Token::NotEq } else { Token::Not },
                    '<' => if followed_by(&mut input, '=') { Token::LessEq } else { Token::Less },
                    '>' => if followed_by(&mut input, '=') { Token::GreaterEq } else { Token::Greater },
                    c => return Err(RuleParseError::UnexpectedChar(line, c)),
                });
            }
        }
    }
    tokens.push(Token::EOF);
    Ok(tokens)
}

fn followed_by(it: &mut Peekable<&mut dyn Iterator<Item = char>>, next: char) -> bool {
    if it.peek() == Some(&next) {
        it.next();
        true
    } else {
        false
    }
}

fn consume_while<F>(it: &mut Peekable<&mut dyn Iterator<Item = char>>, x: F) -> Vec<char>
    where F: Fn(char) -> bool
{
    let mut v: Vec<char> = vec![];
    while let Some(&ch) = it.peek() {
        if x(ch) {
            it.next();
            v.push(ch);
        } else {
            break;
        }
    }
    v
}

// PARSER
//
//

pub fn parse_rules(name: &str, source: &str) -> Result<RuleProgram, RuleParseError> {
    let tokens = lexer(&mut source.chars())?;
    parse(name, &tokens)
}

pub fn parse(name: &str, t: &[Token]) -> Result<RuleProgram, RuleParseError> {
    let mut i = 0;
    let mut statements = Vec::new();
    while t[i] != Token::EOF {
        statements.push(parse_assignment(&mut i, t)?);
    }
    let program = RuleProgram { name: name.to_string(), statements };
    if let Some(max) = program.max_memory_index() {
        if max >= MAX_MEMORY {
            return Err(RuleParseError::MemoryIndex(max, MAX_MEMORY));
        }
    }
    Ok(program)
}

fn matches(i: &mut usize, t: &[Token], tok: Token) -> bool {
    let r = t[*i] == tok;
    if r {
        *i += 1;
    }
    r
}

fn must_match(i: &mut usize, t: &[Token], tok: Token) -> Result<(), RuleParseError> {
    if matches(i, t, tok) {
        Ok(())
    } else {
        Err(RuleParseError::UnexpectedToken(*i, format!("{:?}", t[*i])))
    }
}

fn identifier(i: &mut usize, t: &[Token]) -> Result<String, RuleParseError> {
    let r = match t[*i] {
        Token::Identifier(ref s) => s.clone(),
        ref x => return Err(RuleParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

fn index(i: &mut usize, t: &[Token]) -> Result<usize, RuleParseError> {
    let r = match t[*i] {
        Token::Number(n) if n >= 0 => n as usize,
        ref x => return Err(RuleParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

fn parse_assignment(i: &mut usize, t: &[Token]) -> Result<Assignment, RuleParseError> {
    let name = identifier(i, t)?;
    let target = match name.as_str() {
        "switch" => Target::Switch,
        "light" => Target::Light,
        "crossing" => Target::Crossing,
        "clamp" => Target::Clamp,
        "mem" => Target::Memory,
        _ if VecRef::from_name(&name).is_some() => return Err(RuleParseError::NotWritable(name)),
        _ => return Err(RuleParseError::UnknownVector(name)),
    };
    must_match(i, t, Token::BracketOpen)?;
    let idx = index(i, t)?;
    must_match(i, t, Token::BracketClose)?;
    must_match(i, t, Token::Assign)?;
    let expr = parse_expr(i, t)?;
    must_match(i, t, Token::Semicolon)?;

    // Memory is boolean; other outputs are checked against the output
    // contract when the program is loaded.
    if target == Target::Memory {
        expect(&expr, Type::Bool, "mem assignment")?;
    } else {
        expr.ty()?;
    }
    Ok(Assignment { target, index: idx, expr })
}

fn binary_level(i: &mut usize, t: &[Token], ops: &[(Token, BinOp)],
                next: &dyn Fn(&mut usize, &[Token]) -> Result<Expr, RuleParseError>)
    -> Result<Expr, RuleParseError> {
    let mut lhs = next(i, t)?;
    'outer: loop {
        for (tok, op) in ops {
            if matches(i, t, tok.clone()) {
                let rhs = next(i, t)?;
                lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                continue 'outer;
            }
        }
        return Ok(lhs);
    }
}

pub fn parse_expr(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    binary_level(i, t, &[(Token::Or, BinOp::Or)], &parse_xor)
}

fn parse_xor(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    binary_level(i, t, &[(Token::Xor, BinOp::Xor)], &parse_and)
}

fn parse_and(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    binary_level(i, t, &[(Token::And, BinOp::And)], &parse_cmp)
}

fn parse_cmp(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    let lhs = parse_sum(i, t)?;
    let ops = [(Token::EqEq, BinOp::Eq), (Token::NotEq, BinOp::Ne),
               (Token::LessEq, BinOp::Le), (Token::GreaterEq, BinOp::Ge),
               (Token::Less, BinOp::Lt), (Token::Greater, BinOp::Gt)];
    for (tok, op) in ops.iter() {
        if matches(i, t, tok.clone()) {
            let rhs = parse_sum(i, t)?;
            return Ok(Expr::Binary(*op, Box::new(lhs), Box::new(rhs)));
        }
    }
    Ok(lhs)
}

fn parse_sum(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    binary_level(i, t, &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)], &parse_unary)
}

fn parse_unary(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    if matches(i, t, Token::Not) {
        return Ok(Expr::Not(Box::new(parse_unary(i, t)?)));
    }
    if matches(i, t, Token::Minus) {
        return Ok(Expr::Neg(Box::new(parse_unary(i, t)?)));
    }
    parse_atom(i, t)
}

fn parse_atom(i: &mut usize, t: &[Token]) -> Result<Expr, RuleParseError> {
    match t[*i] {
        Token::Number(n) => {
            *i += 1;
            Ok(Expr::Int(n))
        }
        Token::ParensOpen => {
            *i += 1;
            let e = parse_expr(i, t)?;
            must_match(i, t, Token::ParensClose)?;
            Ok(e)
        }
        Token::Identifier(ref s) => {
            *i += 1;
            match s.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "count" => {
                    must_match(i, t, Token::ParensOpen)?;
                    let vec = vector(i, t)?;
                    must_match(i, t, Token::BracketOpen)?;
                    let from = index(i, t)?;
                    must_match(i, t, Token::Range)?;
                    let to = index(i, t)?;
                    must_match(i, t, Token::BracketClose)?;
                    must_match(i, t, Token::ParensClose)?;
                    if to < from {
                        return Err(RuleParseError::UnexpectedToken(*i, format!("range {}..{}", from, to)));
                    }
                    Ok(Expr::Count(vec, from, to))
                }
                name => {
                    let vec = VecRef::from_name(name)
                        .ok_or_else(|| RuleParseError::UnknownVector(name.to_string()))?;
                    must_match(i, t, Token::BracketOpen)?;
                    let idx = index(i, t)?;
                    must_match(i, t, Token::BracketClose)?;
                    Ok(Expr::Index(vec, idx))
                }
            }
        }
        ref x => Err(RuleParseError::UnexpectedToken(*i, format!("{:?}", x))),
    }
}

fn vector(i: &mut usize, t: &[Token]) -> Result<VecRef, RuleParseError> {
    let name = identifier(i, t)?;
    VecRef::from_name(&name).ok_or(RuleParseError::UnknownVector(name))
}

#[test]
fn test_parse_precedence() {
    let p = parse_rules("t", "light[0] = !occ[1] & occ[2] | prev[0];").unwrap();
    assert_eq!(p.statements.len(), 1);
    assert_eq!(p.statements[0].expr,
               Expr::Binary(BinOp::Or,
                            Box::new(Expr::Binary(BinOp::And,
                                                  Box::new(Expr::Not(Box::new(Expr::Index(VecRef::Occupancy, 1)))),
                                                  Box::new(Expr::Index(VecRef::Occupancy, 2)))),
                            Box::new(Expr::Index(VecRef::Previous, 0))));
}

#[test]
fn test_parse_count_and_memory() {
    let p = parse_rules("t", "# comment\nmem[2] = count(occ[0..4]) >= 2;\nswitch[5] = mem[2];").unwrap();
    assert_eq!(p.memory_size(), 3);
    assert_eq!(p.max_block_index(), Some(5));
}

#[test]
fn test_parse_errors() {
    assert_eq!(parse_rules("t", "occ[0] = true;"),
               Err(RuleParseError::NotWritable("occ".to_string())));
    assert_eq!(parse_rules("t", "light[0] = foo[1];"),
               Err(RuleParseError::UnknownVector("foo".to_string())));
    assert!(parse_rules("t", "mem[0] = 3;").is_err());
    assert!(parse_rules("t", "light[0] = occ[0] & 1;").is_err());
    assert!(parse_rules("t", "light[0] = occ[0]").is_err());
    assert_eq!(parse_rules("t", "light[0] = $;"), Err(RuleParseError::UnexpectedChar(1, '$')));
    assert_eq!(parse_rules("t", "mem[9223372036854775807] = true;"),
               Err(RuleParseError::MemoryIndex(9223372036854775807, MAX_MEMORY)));
    assert!(parse_rules("t", "light[0] = count(mem[0..99999999]) > 0;").is_err());
    // an integer output is well-formed here and rejected later by the contract
    assert!(parse_rules("t", "switch[0] = 1;").is_ok());
}
