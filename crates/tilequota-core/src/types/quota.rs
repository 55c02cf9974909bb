//! Byte quantities used for every budget and usage counter.
//!
//! [`Quota`] is unsigned and wide enough that summing the usage of every
//! tile set of a large cache can never overflow. Signed changes travel as
//! [`QuotaDelta`]; applying a delta that would take a quota below zero clamps
//! at zero and reports the clamp so callers can log the inconsistency.

use std::fmt;
use std::ops::{Add, Neg};

use serde::{Deserialize, Serialize};

/// A binary storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageUnit {
    /// Bytes.
    B,
    /// 1024 bytes.
    KiB,
    /// 1024 KiB.
    MiB,
    /// 1024 MiB.
    GiB,
    /// 1024 GiB.
    TiB,
}

impl StorageUnit {
    /// All units, smallest first.
    pub const ALL: [StorageUnit; 5] = [
        StorageUnit::B,
        StorageUnit::KiB,
        StorageUnit::MiB,
        StorageUnit::GiB,
        StorageUnit::TiB,
    ];

    /// Number of bytes in one of this unit.
    pub fn bytes(self) -> u128 {
        match self {
            Self::B => 1,
            Self::KiB => 1 << 10,
            Self::MiB => 1 << 20,
            Self::GiB => 1 << 30,
            Self::TiB => 1 << 40,
        }
    }

    /// Convert a value expressed in this unit into `target`.
    pub fn convert_to(self, value: f64, target: StorageUnit) -> f64 {
        value * self.bytes() as f64 / target.bytes() as f64
    }

    /// The largest unit for which `bytes` is at least one whole unit.
    pub fn best_fit(bytes: u128) -> StorageUnit {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| bytes >= unit.bytes())
            .unwrap_or(StorageUnit::B)
    }
}

impl fmt::Display for StorageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::B => "B",
            Self::KiB => "KiB",
            Self::MiB => "MiB",
            Self::GiB => "GiB",
            Self::TiB => "TiB",
        };
        f.write_str(name)
    }
}

/// A non-negative byte quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "QuotaRepr", into = "QuotaRepr")]
pub struct Quota {
    bytes: u128,
}

impl Quota {
    /// Zero bytes.
    pub const ZERO: Quota = Quota { bytes: 0 };

    /// Create a quota from a byte count.
    pub const fn from_bytes(bytes: u128) -> Self {
        Self { bytes }
    }

    /// Create a quota from a whole number of units.
    pub fn from_unit(value: u64, unit: StorageUnit) -> Self {
        Self {
            bytes: u128::from(value).saturating_mul(unit.bytes()),
        }
    }

    /// The byte count.
    pub fn bytes(&self) -> u128 {
        self.bytes
    }

    /// Whether this quota is zero bytes.
    pub fn is_zero(&self) -> bool {
        self.bytes == 0
    }

    /// Sum of two quotas.
    pub fn add(self, other: Quota) -> Quota {
        Quota {
            bytes: self.bytes.saturating_add(other.bytes),
        }
    }

    /// Subtract `other`, clamping at zero.
    ///
    /// The returned flag is `true` when the subtraction had to be clamped.
    pub fn subtract(self, other: Quota) -> (Quota, bool) {
        match self.bytes.checked_sub(other.bytes) {
            Some(bytes) => (Quota { bytes }, false),
            None => (Quota::ZERO, true),
        }
    }

    /// Apply a signed delta, clamping at zero.
    ///
    /// The returned flag is `true` when the result had to be clamped.
    pub fn apply(self, delta: QuotaDelta) -> (Quota, bool) {
        if delta.0 >= 0 {
            (self.add(Quota::from_bytes(delta.0.unsigned_abs())), false)
        } else {
            self.subtract(Quota::from_bytes(delta.0.unsigned_abs()))
        }
    }

    /// The signed difference `self - other`.
    pub fn difference(self, other: Quota) -> QuotaDelta {
        QuotaDelta::from(self).add(-QuotaDelta::from(other))
    }

    /// The smaller of two quotas.
    pub fn min(self, other: Quota) -> Quota {
        std::cmp::min(self, other)
    }

    /// The value expressed in `unit`.
    pub fn to_unit(&self, unit: StorageUnit) -> f64 {
        self.bytes as f64 / unit.bytes() as f64
    }

    /// Human-readable form in the best-fitting unit, e.g. `1.5 MiB`.
    pub fn to_nice_string(&self) -> String {
        let unit = StorageUnit::best_fit(self.bytes);
        if unit == StorageUnit::B {
            return format!("{} B", self.bytes);
        }
        let value = format!("{:.2}", self.to_unit(unit));
        let value = value.trim_end_matches('0').trim_end_matches('.');
        format!("{value} {unit}")
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_nice_string())
    }
}

impl Add for Quota {
    type Output = Quota;

    fn add(self, rhs: Quota) -> Quota {
        Quota::add(self, rhs)
    }
}

impl std::iter::Sum for Quota {
    fn sum<I: Iterator<Item = Quota>>(iter: I) -> Quota {
        iter.fold(Quota::ZERO, Quota::add)
    }
}

/// Configuration form of a quota: either a raw byte count or a value with
/// units, e.g. `{ value = 500, units = "MiB" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum QuotaRepr {
    Bytes(u64),
    Scaled { value: f64, units: StorageUnit },
}

impl TryFrom<QuotaRepr> for Quota {
    type Error = String;

    fn try_from(repr: QuotaRepr) -> Result<Self, Self::Error> {
        match repr {
            QuotaRepr::Bytes(bytes) => Ok(Quota::from_bytes(u128::from(bytes))),
            QuotaRepr::Scaled { value, units } => {
                if !value.is_finite() || value < 0.0 {
                    return Err(format!("quota must be a non-negative number, got {value}"));
                }
                let bytes = (value * units.bytes() as f64).round();
                Ok(Quota::from_bytes(bytes as u128))
            }
        }
    }
}

impl From<Quota> for QuotaRepr {
    fn from(quota: Quota) -> Self {
        let units = StorageUnit::best_fit(quota.bytes);
        QuotaRepr::Scaled {
            value: quota.to_unit(units),
            units,
        }
    }
}

/// A signed change to a [`Quota`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaDelta(pub i128);

impl QuotaDelta {
    /// No change.
    pub const ZERO: QuotaDelta = QuotaDelta(0);

    /// Create a delta from a signed byte count.
    pub const fn from_bytes(bytes: i128) -> Self {
        Self(bytes)
    }

    /// The signed byte count.
    pub fn bytes(&self) -> i128 {
        self.0
    }

    /// Whether the delta is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Whether the delta is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl Add for QuotaDelta {
    type Output = QuotaDelta;

    fn add(self, rhs: QuotaDelta) -> QuotaDelta {
        QuotaDelta(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for QuotaDelta {
    fn add_assign(&mut self, rhs: QuotaDelta) {
        *self = *self + rhs;
    }
}

impl Neg for QuotaDelta {
    type Output = QuotaDelta;

    fn neg(self) -> QuotaDelta {
        QuotaDelta(self.0.saturating_neg())
    }
}

impl From<Quota> for QuotaDelta {
    fn from(quota: Quota) -> Self {
        QuotaDelta(i128::try_from(quota.bytes).unwrap_or(i128::MAX))
    }
}

impl From<i64> for QuotaDelta {
    fn from(bytes: i64) -> Self {
        QuotaDelta(i128::from(bytes))
    }
}

impl fmt::Display for QuotaDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "+" };
        let magnitude = Quota::from_bytes(self.0.unsigned_abs());
        write!(f, "{sign}{magnitude}")
    }
}
