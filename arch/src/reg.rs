use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Register numbers as used in format-2 register fields.
/// F is the 48-bit floating accumulator; it has no integer view.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    IntoPrimitive,
    EnumString,
    Display,
)]
#[repr(u8)]
pub enum Reg {
    A = 0,
    X = 1,
    L = 2,
    B = 3,
    S = 4,
    T = 5,
    F = 6,
    PC = 8,
    SW = 9,
}

impl Reg {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_ascii_uppercase().parse::<Self>() {
            Ok(r) => Ok(r),
            Err(_) => Err(format!("Unknown reg name: {s}")),
        }
    }

    /// True for the double-width floating accumulator.
    pub fn is_wide(self) -> bool {
        matches!(self, Reg::F)
    }

    /// Every register, in display order.
    pub fn all() -> [Reg; 9] {
        [
            Reg::A,
            Reg::X,
            Reg::L,
            Reg::B,
            Reg::S,
            Reg::T,
            Reg::F,
            Reg::PC,
            Reg::SW,
        ]
    }
}
