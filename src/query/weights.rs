use serde::{Deserialize, Serialize};

use crate::error::TermdexError;
use crate::Result;

/// How the weights of one document matched by several operands are merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPolicy {
    Sum,
    #[default]
    Mean,
    /// Scale each weight by its origin set's min/max ratio, then average
    Normalize,
}

/// Weight of one contributing item along with its origin set's bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contribution {
    pub weight: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl WeightPolicy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sum" => Ok(WeightPolicy::Sum),
            "mean" => Ok(WeightPolicy::Mean),
            "norm" | "normalize" => Ok(WeightPolicy::Normalize),
            other => Err(TermdexError::Configuration(format!(
                "unknown weight combination '{other}'"
            ))),
        }
    }

    /// `operands` is the number of sets being combined, not the number of
    /// contributions, so a document missing from some operands scores lower.
    pub fn combine(&self, contributions: &[Contribution], operands: usize) -> f64 {
        let operands = operands.max(1) as f64;
        match self {
            WeightPolicy::Sum => contributions.iter().map(|c| c.weight).sum(),
            WeightPolicy::Mean => contributions.iter().map(|c| c.weight).sum::<f64>() / operands,
            WeightPolicy::Normalize => {
                let total: f64 = contributions
                    .iter()
                    .map(|c| {
                        if c.max_weight > 0.0 {
                            c.weight * (c.min_weight / c.max_weight)
                        } else {
                            c.weight
                        }
                    })
                    .sum();
                total / operands
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(weight: f64, min_weight: f64, max_weight: f64) -> Contribution {
        Contribution {
            weight,
            min_weight,
            max_weight,
        }
    }

    #[test]
    fn test_policies() {
        let items = [c(2.0, 1.0, 4.0), c(4.0, 2.0, 4.0)];
        assert_eq!(WeightPolicy::Sum.combine(&items, 2), 6.0);
        assert_eq!(WeightPolicy::Mean.combine(&items, 3), 2.0);
        // 2*(1/4) + 4*(2/4) = 2.5, over 2 operands
        assert_eq!(WeightPolicy::Normalize.combine(&items, 2), 1.25);
    }

    #[test]
    fn test_unscored_origin_is_not_scaled() {
        assert_eq!(WeightPolicy::Normalize.combine(&[c(0.5, 0.0, 0.0)], 1), 0.5);
    }

    #[test]
    fn test_names() {
        assert_eq!(WeightPolicy::from_name("norm").unwrap(), WeightPolicy::Normalize);
        assert!(WeightPolicy::from_name("max").is_err());
    }
}
