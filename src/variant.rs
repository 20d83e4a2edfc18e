//! Closed set of estimator variants.
//!
//! A variant is a `(family, precision)` pair. Its identity string, e.g. `hllpp:14`, is the
//! grouping key for every error record downstream, so the formatting here is load-bearing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EstimatorError;

/// Supported precision range for register-indexed families.
pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 18;

/// Estimator family together with its family-specific precision parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Variant {
    /// HyperLogLog with byte registers, parameterised by the target relative error.
    Classic { error_rate: f64 },
    /// HyperLogLog with 6-bit packed registers and LogLog-Beta correction.
    Packed { precision: u8 },
    /// HyperLogLog++ with sparse representation.
    PlusPlus { precision: u8 },
}

impl Variant {
    /// Family prefix of the identity string.
    pub fn family(&self) -> &'static str {
        match self {
            Variant::Classic { .. } => "hyperloglog",
            Variant::Packed { .. } => "HLL",
            Variant::PlusPlus { .. } => "hllpp",
        }
    }

    /// Stable name encoding family and precision.
    pub fn identity(&self) -> String {
        self.to_string()
    }

    /// Check that the precision parameter is supported by the family.
    pub fn validate(&self) -> Result<(), EstimatorError> {
        let ok = match *self {
            Variant::Classic { error_rate } => error_rate > 0.0 && error_rate < 1.0,
            Variant::Packed { precision } | Variant::PlusPlus { precision } => {
                (MIN_PRECISION..=MAX_PRECISION).contains(&precision)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(EstimatorError::InvalidVariant(self.identity()))
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Classic { error_rate } => write!(f, "{}:{}", self.family(), error_rate),
            Variant::Packed { precision } | Variant::PlusPlus { precision } => {
                write!(f, "{}:{}", self.family(), precision)
            }
        }
    }
}

impl FromStr for Variant {
    type Err = EstimatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EstimatorError::InvalidVariant(s.to_string());
        let (family, param) = s.split_once(':').ok_or_else(invalid)?;
        let variant = match family {
            "hyperloglog" => Variant::Classic {
                error_rate: param.parse().map_err(|_| invalid())?,
            },
            "HLL" => Variant::Packed {
                precision: param.parse().map_err(|_| invalid())?,
            },
            "hllpp" => Variant::PlusPlus {
                precision: param.parse().map_err(|_| invalid())?,
            },
            _ => return Err(invalid()),
        };
        variant.validate()?;
        Ok(variant)
    }
}

impl TryFrom<String> for Variant {
    type Error = EstimatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Variant> for String {
    fn from(value: Variant) -> Self {
        value.identity()
    }
}

/// A configured variant plus its insertion budget.
///
/// `insert_cap` bounds how many items a single instance receives during a trial, even when
/// the trial target is larger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub variant: Variant,
    pub insert_cap: Option<usize>,
}

impl VariantSpec {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            insert_cap: None,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.insert_cap = Some(cap);
        self
    }

    pub fn identity(&self) -> String {
        self.variant.identity()
    }

    /// Number of items out of `n` this variant actually receives.
    #[inline]
    pub fn budget(&self, n: usize) -> usize {
        self.insert_cap.map_or(n, |cap| cap.min(n))
    }
}

/// Build the fixed variant list from identity strings, resolving insertion caps by name prefix.
///
/// When several prefixes match, the longest one wins.
pub fn resolve_variants(
    names: &[String],
    caps: &BTreeMap<String, usize>,
) -> Result<Vec<VariantSpec>, EstimatorError> {
    names
        .iter()
        .map(|name| {
            let variant: Variant = name.parse()?;
            let identity = variant.identity();
            let cap = caps
                .iter()
                .filter(|(prefix, _)| identity.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, &cap)| cap);
            Ok(VariantSpec {
                variant,
                insert_cap: cap,
            })
        })
        .collect()
}

/// Variant names benchmarked when no configuration is given.
pub fn default_variant_names() -> Vec<String> {
    [
        "hyperloglog:0.01",
        "HLL:13",
        "HLL:15",
        "hllpp:13",
        "hllpp:14",
        "hllpp:15",
        "hllpp:18",
        "hllpp:17",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Insertion caps applied when no configuration is given.
pub fn default_insert_caps() -> BTreeMap<String, usize> {
    BTreeMap::from([("hyperloglog:".to_string(), 1000)])
}

/// The default variant list with default caps.
pub fn default_variants() -> Vec<VariantSpec> {
    // Defaults are statically valid.
    resolve_variants(&default_variant_names(), &default_insert_caps()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("hyperloglog:0.01" => Variant::Classic { error_rate: 0.01 })]
    #[test_case("HLL:13" => Variant::Packed { precision: 13 })]
    #[test_case("hllpp:18" => Variant::PlusPlus { precision: 18 })]
    fn test_parse(name: &str) -> Variant {
        let variant: Variant = name.parse().unwrap();
        assert_eq!(variant.identity(), name);
        variant
    }

    #[test_case("hllpp:3"; "precision too low")]
    #[test_case("HLL:19"; "precision too high")]
    #[test_case("hyperloglog:1.5"; "error rate out of range")]
    #[test_case("hyperloglog:abc"; "not a number")]
    #[test_case("loglog:12"; "unknown family")]
    #[test_case("hllpp"; "missing precision")]
    fn test_parse_invalid(name: &str) {
        assert!(name.parse::<Variant>().is_err());
    }

    #[test]
    fn test_caps_resolved_by_prefix() {
        let variants = default_variants();
        assert_eq!(variants.len(), 8);
        for spec in &variants {
            let expected = match spec.variant {
                Variant::Classic { .. } => Some(1000),
                _ => None,
            };
            assert_eq!(spec.insert_cap, expected, "{}", spec.identity());
        }
        assert_eq!(variants[0].budget(5000), 1000);
        assert_eq!(variants[0].budget(10), 10);
        assert_eq!(variants[1].budget(5000), 5000);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let caps = BTreeMap::from([("hllpp:".to_string(), 10), ("hllpp:1".to_string(), 20)]);
        let names = vec!["hllpp:9".to_string(), "hllpp:14".to_string()];
        let variants = resolve_variants(&names, &caps).unwrap();
        assert_eq!(variants[0].insert_cap, Some(10));
        assert_eq!(variants[1].insert_cap, Some(20));
    }

    #[test]
    fn test_serde_as_identity() {
        let spec = VariantSpec::new(Variant::PlusPlus { precision: 14 }).with_cap(7);
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"variant":"hllpp:14","insert_cap":7}"#);
        let back: VariantSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
