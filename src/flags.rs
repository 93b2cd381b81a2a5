//! Update flags: the per-quadrature-point quantities finite element values must provide.
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A bit set of quantities that must be computed when finite element values are reinitialized.
///
/// Operands report the flags they need, operators take the union of their children
/// and integrals add [`UpdateFlags::JXW_VALUES`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    pub const DEFAULT: Self = Self(0);
    pub const VALUES: Self = Self(1 << 0);
    pub const GRADIENTS: Self = Self(1 << 1);
    pub const HESSIANS: Self = Self(1 << 2);
    pub const THIRD_DERIVATIVES: Self = Self(1 << 3);
    pub const QUADRATURE_POINTS: Self = Self(1 << 4);
    pub const JXW_VALUES: Self = Self(1 << 5);
    pub const NORMAL_VECTORS: Self = Self(1 << 6);
    pub const JACOBIANS: Self = Self(1 << 7);

    const NAMED: [(Self, &'static str); 8] = [
        (Self::VALUES, "VALUES"),
        (Self::GRADIENTS, "GRADIENTS"),
        (Self::HESSIANS, "HESSIANS"),
        (Self::THIRD_DERIVATIVES, "THIRD_DERIVATIVES"),
        (Self::QUADRATURE_POINTS, "QUADRATURE_POINTS"),
        (Self::JXW_VALUES, "JXW_VALUES"),
        (Self::NORMAL_VECTORS, "NORMAL_VECTORS"),
        (Self::JACOBIANS, "JACOBIANS"),
    ];

    pub const fn empty() -> Self {
        Self::DEFAULT
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every flag in `other` is also set in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// The flags in `self` that are not in `other`.
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// The flags in `self` that `available` cannot provide.
    pub const fn missing_from(self, available: Self) -> Self {
        self.difference(available)
    }

    /// The flags needed to evaluate derivatives of the given order of shape functions.
    pub fn for_derivative_order(order: usize) -> Self {
        match order {
            0 => Self::VALUES,
            1 => Self::GRADIENTS,
            2 => Self::HESSIANS,
            3 => Self::THIRD_DERIVATIVES,
            _ => panic!("Shape function derivatives of order {order} are not supported"),
        }
    }

    /// The highest shape function derivative order requested by these flags, if any.
    pub fn max_derivative_order(&self) -> Option<usize> {
        (0..=3)
            .rev()
            .find(|&order| self.contains(Self::for_derivative_order(order)))
    }
}

impl BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for UpdateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl BitAnd for UpdateFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.intersection(rhs)
    }
}

impl Display for UpdateFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "DEFAULT");
        }
        let mut first = true;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl Debug for UpdateFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateFlags({self})")
    }
}
