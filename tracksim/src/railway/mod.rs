//! Railway simulation.

pub mod state;
pub mod authority;
pub mod movement;
pub mod logic;
pub mod wayside;
pub mod bus;
pub mod sim;

use failure::Fail;

use self::authority::AuthorityError;
use self::movement::MovementFault;
use self::wayside::{LogicLoadError, ScanError};

/// Runtime fault conditions, kept distinguishable so the event loop can
/// record them rather than swallow them.
#[derive(Debug, Fail, Clone, PartialEq)]
pub enum Fault {
    #[fail(display = "movement fault: {}", _0)]
    Movement(#[cause] MovementFault),
    #[fail(display = "scan fault: {}", _0)]
    Scan(#[cause] ScanError),
    #[fail(display = "authority fault: {}", _0)]
    Authority(#[cause] AuthorityError),
    #[fail(display = "logic load rejected: {}", _0)]
    Load(#[cause] LogicLoadError),
}

impl Fault {
    /// Safety-critical faults require emergency handling of the train
    /// involved.
    pub fn is_safety_critical(&self) -> bool {
        match *self {
            Fault::Movement(ref m) => m.is_safety_critical(),
            _ => false,
        }
    }
}

impl From<MovementFault> for Fault {
    fn from(e: MovementFault) -> Fault { Fault::Movement(e) }
}

impl From<ScanError> for Fault {
    fn from(e: ScanError) -> Fault { Fault::Scan(e) }
}

impl From<AuthorityError> for Fault {
    fn from(e: AuthorityError) -> Fault { Fault::Authority(e) }
}

impl From<LogicLoadError> for Fault {
    fn from(e: LogicLoadError) -> Fault { Fault::Load(e) }
}
