//! Shared resource accounting for one top-level command's resolution tree

use std::fmt;
use std::time::{Duration, Instant};

/// Which limit stopped a resolution step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExhausted {
    Depth,
    Substitutions,
    Time,
}

impl fmt::Display for BudgetExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetExhausted::Depth => write!(f, "maximum substitution depth reached"),
            BudgetExhausted::Substitutions => write!(f, "maximum substitution count reached"),
            BudgetExhausted::Time => write!(f, "resolution time limit exceeded"),
        }
    }
}

/// Budget for recursive substitution resolution.
///
/// Created once per top-level command and passed as `&mut` through every
/// recursive call. There is deliberately no way to reset it.
///
/// The substitution count only ever goes down, and elapsed time only grows.
/// Depth is scoped to the current path: [`ExecutionBudget::descend`] takes one
/// level for the duration of a closure and returns it afterwards, so sibling
/// substitutions each get the same remaining depth, while the minimum ever
/// reached is tracked in [`ExecutionBudget::min_remaining_depth`].
#[derive(Debug)]
pub struct ExecutionBudget {
    remaining_depth: u32,
    min_remaining_depth: u32,
    remaining_substitutions: u32,
    started: Instant,
    max_time: Duration,
}

impl ExecutionBudget {
    pub fn new(max_depth: u32, max_substitutions: u32, max_time: Duration) -> Self {
        Self {
            remaining_depth: max_depth,
            min_remaining_depth: max_depth,
            remaining_substitutions: max_substitutions,
            started: Instant::now(),
            max_time,
        }
    }

    pub fn remaining_depth(&self) -> u32 {
        self.remaining_depth
    }

    pub fn min_remaining_depth(&self) -> u32 {
        self.min_remaining_depth
    }

    pub fn remaining_substitutions(&self) -> u32 {
        self.remaining_substitutions
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    /// Time left before the deadline, zero once it has passed
    pub fn time_left(&self) -> Duration {
        self.max_time.saturating_sub(self.elapsed())
    }

    pub fn check_time(&self) -> Result<(), BudgetExhausted> {
        if self.elapsed() >= self.max_time {
            Err(BudgetExhausted::Time)
        } else {
            Ok(())
        }
    }

    /// Check every limit and consume one substitution.
    ///
    /// Nothing is consumed when a limit is already hit.
    pub fn consume_substitution(&mut self) -> Result<(), BudgetExhausted> {
        if self.remaining_depth == 0 {
            return Err(BudgetExhausted::Depth);
        }
        if self.remaining_substitutions == 0 {
            return Err(BudgetExhausted::Substitutions);
        }
        self.check_time()?;
        self.remaining_substitutions -= 1;
        Ok(())
    }

    /// Run `f` one level deeper in the resolution tree.
    pub fn descend<T>(
        &mut self,
        f: impl FnOnce(&mut ExecutionBudget) -> T,
    ) -> Result<T, BudgetExhausted> {
        if self.remaining_depth == 0 {
            return Err(BudgetExhausted::Depth);
        }
        self.remaining_depth -= 1;
        self.min_remaining_depth = self.min_remaining_depth.min(self.remaining_depth);
        let out = f(self);
        self.remaining_depth += 1;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_count_is_monotonic() {
        let mut budget = ExecutionBudget::new(3, 2, Duration::from_secs(60));
        assert!(budget.consume_substitution().is_ok());
        assert!(budget.consume_substitution().is_ok());
        assert_eq!(
            budget.consume_substitution(),
            Err(BudgetExhausted::Substitutions)
        );
        assert_eq!(budget.remaining_substitutions(), 0);
    }

    #[test]
    fn test_zero_depth_refuses_everything() {
        let mut budget = ExecutionBudget::new(0, 5, Duration::from_secs(60));
        assert_eq!(budget.consume_substitution(), Err(BudgetExhausted::Depth));
        assert_eq!(budget.descend(|_| ()), Err(BudgetExhausted::Depth));
        assert_eq!(budget.remaining_substitutions(), 5);
    }

    #[test]
    fn test_descend_is_path_scoped() {
        let mut budget = ExecutionBudget::new(2, 10, Duration::from_secs(60));
        let inner = budget
            .descend(|b| {
                assert_eq!(b.remaining_depth(), 1);
                b.descend(|b2| b2.remaining_depth()).unwrap()
            })
            .unwrap();
        assert_eq!(inner, 0);
        assert_eq!(budget.remaining_depth(), 2);
        assert_eq!(budget.min_remaining_depth(), 0);
    }

    #[test]
    fn test_time_limit() {
        let mut budget = ExecutionBudget::new(2, 10, Duration::ZERO);
        assert_eq!(budget.consume_substitution(), Err(BudgetExhausted::Time));
        assert_eq!(budget.time_left(), Duration::ZERO);
    }
}
