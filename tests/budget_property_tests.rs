//! Property-based tests for the budget evaluator
//!
//! The evaluator decides whether a cashier may pay out, so these tests pin down
//! the arithmetic: the whole request is always attributed, deficits follow the
//! `attributed - available` rule and the result depends only on its inputs.

use expense_approval::{
    WorkflowError,
    budget::{BudgetAllocation, Enforcement, attribute, evaluate},
    money::Money,
};
use proptest::prelude::*;

/// Allocation with a non-negative ceiling and usage that may exceed it
fn allocation_strategy() -> impl Strategy<Value = BudgetAllocation> {
    (0i64..1_000_000, 0i64..1_200_000, any::<u16>()).prop_map(|(allocated, used, n)| {
        let id = format!("cat_{}", n);
        let mut allocation = BudgetAllocation::new(&id, &id, &id, Money::from_units(allocated));
        allocation.used = Money::from_units(used);
        allocation
    })
}

/// 1 to 5 categories with distinct ids
fn allocations_strategy() -> impl Strategy<Value = Vec<BudgetAllocation>> {
    prop::collection::vec(allocation_strategy(), 1..=5).prop_map(|mut allocations| {
        for (idx, allocation) in allocations.iter_mut().enumerate() {
            allocation.category_id = format!("cat_{}", idx);
        }
        allocations
    })
}

fn requested_strategy() -> impl Strategy<Value = Money> {
    (1i64..3_000_000).prop_map(Money::from_units)
}

proptest! {
    /// Property: same snapshot, amount and order give the same result
    #[test]
    fn prop_evaluation_is_deterministic(
        allocations in allocations_strategy(),
        requested in requested_strategy(),
    ) {
        let first = attribute(requested, &allocations);
        let second = attribute(requested, &allocations.clone());

        prop_assert_eq!(first, second);
    }

    /// Property: the full requested amount is attributed, never more
    #[test]
    fn prop_requested_amount_is_fully_attributed(
        allocations in allocations_strategy(),
        requested in requested_strategy(),
    ) {
        let evaluation = attribute(requested, &allocations);

        prop_assert_eq!(evaluation.total_attributed(), requested);
        prop_assert!(evaluation.attributions.iter().all(|a| a.amount.is_positive()));
    }

    /// Property: every warning's deficit is its share minus what was available
    #[test]
    fn prop_deficit_is_share_minus_available(
        allocations in allocations_strategy(),
        requested in requested_strategy(),
    ) {
        let evaluation = attribute(requested, &allocations);

        for warning in &evaluation.warnings {
            let available = warning.allocated - warning.used;
            prop_assert!(warning.deficit.is_positive());
            prop_assert_eq!(warning.deficit, warning.requested - available);
        }
    }

    /// Property: with no overdrawn categories the total deficit is whatever
    /// the request exceeds the combined availability by
    #[test]
    fn prop_total_deficit_matches_combined_shortfall(
        allocations in allocations_strategy(),
        requested in requested_strategy(),
    ) {
        prop_assume!(allocations.iter().all(|a| !a.available().is_negative()));

        let available: Money = allocations.iter().map(|a| a.available()).sum();
        let expected = (requested - available).max(Money::zero());
        let evaluation = attribute(requested, &allocations);

        prop_assert_eq!(evaluation.total_deficit(), expected);
        prop_assert!(evaluation.warnings.len() <= 1);
    }

    /// Property: only the binding mode without override can fail, and only when
    /// there are warnings
    #[test]
    fn prop_enforcement_modes(
        allocations in allocations_strategy(),
        requested in requested_strategy(),
    ) {
        let fits = attribute(requested, &allocations).fits();

        prop_assert!(evaluate(requested, &allocations, Enforcement::Advisory).is_ok());
        let overridden = evaluate(
            requested,
            &allocations,
            Enforcement::Binding { override_budget_limit: true },
        );
        prop_assert!(overridden.is_ok());

        let binding = evaluate(
            requested,
            &allocations,
            Enforcement::Binding { override_budget_limit: false },
        );
        if fits {
            prop_assert!(binding.is_ok());
        } else {
            prop_assert!(
                matches!(binding, Err(WorkflowError::BudgetExceeded { .. })),
                "binding check must block a shortfall"
            );
        }
    }
}
