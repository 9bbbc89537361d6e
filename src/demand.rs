use std::{
    fmt,
    ops::{Add, AddAssign},
};

// -------------------------------------------------------------------------------------------------

/// Number of values a [`Subscriber`](crate::Subscriber) is willing to receive.
///
/// Demand is requested via [`Subscription::request`](crate::Subscription::request) and
/// returned from [`Subscriber::receive`](crate::Subscriber::receive). It accumulates: all
/// additions saturate, so adding anything to [`Demand::Unlimited`] or overflowing a finite
/// demand results in unlimited demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demand {
    /// A finite number of values.
    Finite(u64),
    /// No upper bound: every value gets delivered.
    Unlimited,
}

impl Demand {
    /// No demand at all.
    pub const NONE: Demand = Demand::Finite(0);
    /// Unbounded demand.
    pub const UNLIMITED: Demand = Demand::Unlimited;

    /// Demand for at most `count` values.
    pub const fn max(count: u64) -> Self {
        Demand::Finite(count)
    }

    /// True when no value may be delivered.
    pub const fn is_none(&self) -> bool {
        matches!(self, Demand::Finite(0))
    }

    /// True when at least one value may be delivered.
    pub const fn has_demand(&self) -> bool {
        !self.is_none()
    }

    pub const fn is_unlimited(&self) -> bool {
        matches!(self, Demand::Unlimited)
    }

    /// Remaining finite count, or `None` for unlimited demand.
    pub const fn remaining(&self) -> Option<u64> {
        match self {
            Demand::Finite(count) => Some(*count),
            Demand::Unlimited => None,
        }
    }

    /// Add two demands, saturating at [`Demand::Unlimited`].
    pub const fn saturating_add(self, other: Demand) -> Demand {
        match (self, other) {
            (Demand::Finite(a), Demand::Finite(b)) => match a.checked_add(b) {
                Some(total) => Demand::Finite(total),
                None => Demand::Unlimited,
            },
            _ => Demand::Unlimited,
        }
    }

    /// Consume a single unit of demand. Returns false, leaving the demand untouched, when
    /// there is none left.
    pub fn consume_one(&mut self) -> bool {
        match self {
            Demand::Unlimited => true,
            Demand::Finite(0) => false,
            Demand::Finite(count) => {
                *count -= 1;
                true
            }
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Demand::NONE
    }
}

impl From<u64> for Demand {
    fn from(count: u64) -> Self {
        Demand::Finite(count)
    }
}

impl Add for Demand {
    type Output = Demand;

    fn add(self, rhs: Demand) -> Demand {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Demand) {
        *self = self.saturating_add(rhs);
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demand::Finite(count) => write!(f, "{count}"),
            Demand::Unlimited => write!(f, "unlimited"),
        }
    }
}

// -------------------------------------------------------------------------------------------------
