//! Per-invocation caps on mutating actions.

use serde::{Deserialize, Serialize};

/// Configured action caps. Zero disables the action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Follows allowed per invocation.
    #[serde(default)]
    pub follow: u32,
    /// Unfollows (and removals/blocks) allowed per invocation.
    #[serde(default)]
    pub unfollow: u32,
}

impl Limits {
    /// Create limits.
    pub fn new(follow: u32, unfollow: u32) -> Self {
        Self { follow, unfollow }
    }
}

/// Result of charging a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    /// Charged; more actions remain.
    Ok,
    /// The cap is met. Either this charge filled it, or it was already full
    /// (always the case with a zero cap) and nothing was charged.
    CapReached,
}

/// Counter of actions performed against a cap.
///
/// Budgets live for one executor invocation; nothing is tracked across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBudget {
    performed: u32,
    cap: u32,
}

impl ActionBudget {
    /// Create a budget with `cap` actions.
    pub fn new(cap: u32) -> Self {
        Self { performed: 0, cap }
    }

    /// Record one successful action.
    pub fn charge(&mut self) -> Charge {
        if self.performed >= self.cap {
            return Charge::CapReached;
        }
        self.performed += 1;
        if self.performed == self.cap {
            Charge::CapReached
        } else {
            Charge::Ok
        }
    }

    /// True when no further action may be performed.
    pub fn is_exhausted(&self) -> bool {
        self.performed >= self.cap
    }

    /// Actions performed so far.
    pub fn performed(&self) -> u32 {
        self.performed
    }

    /// Configured cap.
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Actions still allowed.
    pub fn remaining(&self) -> u32 {
        self.cap.saturating_sub(self.performed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_cap_refuses_first_charge() {
        let mut budget = ActionBudget::new(0);
        assert!(budget.is_exhausted());
        assert_eq!(budget.charge(), Charge::CapReached);
        assert_eq!(budget.performed(), 0);
    }

    #[test]
    fn test_charge_until_cap() {
        let mut budget = ActionBudget::new(3);
        assert_eq!(budget.charge(), Charge::Ok);
        assert_eq!(budget.charge(), Charge::Ok);
        assert_eq!(budget.remaining(), 1);
        assert_eq!(budget.charge(), Charge::CapReached);
        assert_eq!(budget.performed(), 3);
        assert!(budget.is_exhausted());

        // Further charges never exceed the cap.
        assert_eq!(budget.charge(), Charge::CapReached);
        assert_eq!(budget.performed(), 3);
    }

    #[test]
    fn test_limits_deserialize_with_defaults() {
        let limits: Limits = serde_json::from_str(r#"{"unfollow": 150}"#).unwrap();
        assert_eq!(limits, Limits::new(0, 150));
    }
}
