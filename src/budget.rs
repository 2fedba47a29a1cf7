//! Budget allocations and the evaluator that checks a request against them
//!
//! The evaluator is a pure function of the allocation snapshot, the requested
//! amount and the order in which categories were chosen. The requested amount
//! cascades through the categories: each one absorbs up to what it still has
//! available and passes the remainder on. The last category takes whatever is
//! left, which is where a shortfall shows up as a [`BudgetWarning`].
use super::error::{WorkflowError, WorkflowResult};
use super::money::Money;
use serde::Serialize;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct BudgetAllocation {
    #[n(0)]
    pub category_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub code: String,
    #[n(3)]
    pub allocated: Money,
    // only ever grows, through a committed `process` transition
    #[n(4)]
    pub used: Money,
}

/// The share of a request charged to one category.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    #[n(0)]
    pub category_id: String,
    #[n(1)]
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetWarning {
    pub category_id: String,
    pub category_name: String,
    pub allocated: Money,
    pub used: Money,
    pub requested: Money,
    pub deficit: Money,
}

/// How warnings are enforced at a given call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// Warnings are reported, the transition proceeds.
    Advisory,
    /// Warnings block unless the caller explicitly overrides the limit.
    Binding { override_budget_limit: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetEvaluation {
    pub attributions: Vec<Attribution>,
    pub warnings: Vec<BudgetWarning>,
}

impl BudgetAllocation {
    pub fn new(category_id: &str, name: &str, code: &str, allocated: Money) -> Self {
        Self {
            category_id: category_id.to_string(),
            name: name.to_string(),
            code: code.to_string(),
            allocated,
            used: Money::zero(),
        }
    }

    /// May be negative once an overspend has been authorised.
    pub fn available(&self) -> Money {
        self.allocated.saturating_sub(self.used)
    }
}

impl BudgetEvaluation {
    /// True when the whole request fits in the available budget.
    pub fn fits(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn total_attributed(&self) -> Money {
        self.attributions
            .iter()
            .fold(Money::zero(), |acc, a| acc.saturating_add(a.amount))
    }

    pub fn total_deficit(&self) -> Money {
        self.warnings
            .iter()
            .fold(Money::zero(), |acc, w| acc.saturating_add(w.deficit))
    }
}

/// Splits `requested` across `allocations` in the order given.
pub fn attribute(requested: Money, allocations: &[BudgetAllocation]) -> BudgetEvaluation {
    let mut evaluation = BudgetEvaluation::default();
    let mut remaining = requested;
    let last = allocations.len().saturating_sub(1);

    for (idx, allocation) in allocations.iter().enumerate() {
        if !remaining.is_positive() {
            break;
        }
        let available = allocation.available();
        let share = if idx == last {
            remaining
        } else {
            remaining.min(available.max(Money::zero()))
        };
        if share.is_zero() {
            continue;
        }
        remaining -= share;

        if share > available {
            evaluation.warnings.push(BudgetWarning {
                category_id: allocation.category_id.clone(),
                category_name: allocation.name.clone(),
                allocated: allocation.allocated,
                used: allocation.used,
                requested: share,
                deficit: share.saturating_sub(available),
            });
        }
        evaluation.attributions.push(Attribution {
            category_id: allocation.category_id.clone(),
            amount: share,
        });
    }

    evaluation
}

/// Runs the attribution and applies the enforcement policy of the call site.
///
/// Under [`Enforcement::Binding`] a non-empty warning list fails with
/// `BudgetExceeded` unless the override flag is set.
pub fn evaluate(
    requested: Money,
    allocations: &[BudgetAllocation],
    enforcement: Enforcement,
) -> WorkflowResult<BudgetEvaluation> {
    if allocations.is_empty() {
        return Err(WorkflowError::InvalidPayload(
            "at least one budget category is required".into(),
        ));
    }
    if requested.is_negative() {
        return Err(WorkflowError::InvalidPayload(format!(
            "requested amount must not be negative, got {}",
            requested
        )));
    }

    let evaluation = attribute(requested, allocations);

    match enforcement {
        Enforcement::Binding {
            override_budget_limit: false,
        } if !evaluation.fits() => Err(WorkflowError::BudgetExceeded {
            warnings: evaluation.warnings,
        }),
        _ => Ok(evaluation),
    }
}
