//! Combination operators, resolved from their names once at query build time.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::TermdexError;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
}

impl Comparator {
    pub fn from_symbol(symbol: &str) -> Result<Self> {
        match symbol {
            "<" => Ok(Comparator::Less),
            "<=" => Ok(Comparator::LessOrEqual),
            "=" | "==" => Ok(Comparator::Equal),
            ">=" => Ok(Comparator::GreaterOrEqual),
            ">" => Ok(Comparator::Greater),
            other => Err(TermdexError::Configuration(format!(
                "unknown distance comparator '{other}'"
            ))),
        }
    }

    /// Does `value <op> bound` hold?
    pub fn accepts(&self, value: u64, bound: u64) -> bool {
        let ord = value.cmp(&bound);
        match self {
            Comparator::Less => ord == Ordering::Less,
            Comparator::LessOrEqual => ord != Ordering::Greater,
            Comparator::Equal => ord == Ordering::Equal,
            Comparator::GreaterOrEqual => ord != Ordering::Less,
            Comparator::Greater => ord == Ordering::Greater,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    Word,
    Character,
    Element,
}

impl DistanceUnit {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "word" => Ok(DistanceUnit::Word),
            "character" | "char" => Ok(DistanceUnit::Character),
            "element" => Ok(DistanceUnit::Element),
            other => Err(TermdexError::Configuration(format!(
                "unknown proximity unit '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityKind {
    /// Some hit of the left group lies within distance of the right hit
    Prox,
    /// Every hit of the left group lies within distance of the right hit
    Window,
}

/// Distance constraint between consecutive operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proximity {
    pub kind: ProximityKind,
    pub distance: u32,
    pub unit: DistanceUnit,
    pub ordered: bool,
    pub comparator: Comparator,
}

impl Proximity {
    /// Adjacent words in query order.
    pub fn phrase() -> Self {
        Self {
            kind: ProximityKind::Prox,
            distance: 1,
            unit: DistanceUnit::Word,
            ordered: true,
            comparator: Comparator::Equal,
        }
    }

    pub fn prox() -> Self {
        Self {
            kind: ProximityKind::Prox,
            distance: 1,
            unit: DistanceUnit::Word,
            ordered: false,
            comparator: Comparator::LessOrEqual,
        }
    }

    pub fn window() -> Self {
        Self {
            kind: ProximityKind::Window,
            ..Self::prox()
        }
    }

    pub fn with_distance(mut self, distance: u32, comparator: Comparator) -> Self {
        self.distance = distance;
        self.comparator = comparator;
        self
    }

    pub fn with_unit(mut self, unit: DistanceUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Check a signed distance from left to right.
    pub fn accepts(&self, distance: i64) -> bool {
        if self.ordered && distance < 0 {
            return false;
        }
        self.comparator
            .accepts(distance.unsigned_abs(), u64::from(self.distance))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    And,
    Or,
    Not,
    Prox(Proximity),
}

impl Operator {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "and" | "all" => Ok(Operator::And),
            "or" | "any" => Ok(Operator::Or),
            "not" => Ok(Operator::Not),
            "adj" | "=" => Ok(Operator::Prox(Proximity::phrase())),
            "prox" => Ok(Operator::Prox(Proximity::prox())),
            "window" => Ok(Operator::Prox(Proximity::window())),
            other => Err(TermdexError::Configuration(format!(
                "unknown combination operator '{other}'"
            ))),
        }
    }

    /// Every operand must contribute to a match.
    pub fn requires_all(&self) -> bool {
        matches!(self, Operator::And | Operator::Prox(_))
    }

    /// Operand order carries meaning and must not be rearranged.
    pub fn preserves_order(&self) -> bool {
        matches!(self, Operator::Not | Operator::Prox(_))
    }

    pub fn proximity(&self) -> Option<&Proximity> {
        match self {
            Operator::Prox(prox) => Some(prox),
            _ => None,
        }
    }
}
