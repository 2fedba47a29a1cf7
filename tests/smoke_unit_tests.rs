//! Smoke Screen Unit tests for expense approval components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!

use expense_approval::{
    WorkflowError,
    budget::{BudgetAllocation, attribute},
    expense::{ExpenseDraft, ExpenseItem, ExpenseRequest},
    money::Money,
    state::{Action, Actor, ExpenseStatus, Role, available_actions, check_transition},
    trail::{AccountantApproval, ApprovalTrail, Witness},
    utils::{format_request_number, new_uuid_to_bech32},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that new_uuid_to_bech32 generates valid bech32-encoded strings
    /// with the correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let result = new_uuid_to_bech32("exp_");
        assert!(result.is_ok());

        let encoded = result.unwrap();
        assert!(encoded.starts_with("exp_1"));
        assert!(encoded.len() > 10);
    }

    /// Test that the function handles empty strings appropriately
    #[test]
    fn handles_empty_hrp() {
        let result = new_uuid_to_bech32("");
        assert!(result.is_err());
    }

    /// Test that multiple calls generate unique identifiers
    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("exp_").unwrap();
        let id2 = new_uuid_to_bech32("exp_").unwrap();
        let id3 = new_uuid_to_bech32("exp_").unwrap();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    /// Test that request numbers carry the prefix and a padded sequence
    #[test]
    fn request_numbers_sort_by_sequence() {
        let a = format_request_number("EXP", 9);
        let b = format_request_number("EXP", 10);

        assert!(a.starts_with("EXP-"));
        assert!(a < b);
    }
}

// EXPENSE MODULE TESTS
#[cfg(test)]
mod expense_tests {
    use super::*;

    fn draft() -> ExpenseDraft {
        ExpenseDraft::new()
            .set_requester("user_alice")
            .set_department("Microfinance")
            .set_purpose("Member outreach day")
            .add_item(ExpenseItem::new("Tents", "events", 3, Money::from_units(2_000)))
            .add_item(ExpenseItem::new("Water", "events", 40, Money::from_units(50)))
    }

    /// Test that the item estimate is quantity times unit price
    #[test]
    fn item_estimate_from_quantity() {
        let item = ExpenseItem::new("Tents", "events", 3, Money::from_units(2_000));
        assert_eq!(item.estimated_amount, Money::from_units(6_000));
    }

    /// Test that an independently quoted estimate is kept as given
    #[test]
    fn item_with_quoted_estimate() {
        let item = ExpenseItem::with_estimate(
            "Catering",
            "events",
            1,
            Money::from_units(10_000),
            Money::from_units(12_500),
        );
        assert_eq!(item.estimated_amount, Money::from_units(12_500));
    }

    /// Test that a new request starts as a draft with a matching total
    #[test]
    fn new_request_is_draft() {
        let req = ExpenseRequest::from_draft("exp_1".into(), "EXP-2026-000001".into(), &draft())
            .unwrap();

        assert_eq!(req.status, ExpenseStatus::Draft);
        assert_eq!(req.total_estimated(), Money::from_units(8_000));
        assert_eq!(req.version, 0);
        assert!(req.history.is_empty());
        assert_eq!(req.trail, ApprovalTrail::default());
    }

    /// Test that missing header fields are reported as payload errors
    #[test]
    fn missing_department_is_invalid() {
        let draft = ExpenseDraft::new()
            .set_requester("user_alice")
            .set_purpose("Member outreach day")
            .add_item(ExpenseItem::new("Tents", "events", 3, Money::from_units(2_000)));

        let res = ExpenseRequest::from_draft("exp_1".into(), "EXP-1".into(), &draft);
        assert!(matches!(res, Err(WorkflowError::InvalidPayload(_))));
    }

    /// Test that zero-quantity items are rejected
    #[test]
    fn zero_quantity_item_is_invalid() {
        let draft = draft().add_item(ExpenseItem::new("Chairs", "events", 0, Money::from_units(10)));

        let res = ExpenseRequest::from_draft("exp_1".into(), "EXP-1".into(), &draft);
        assert!(matches!(res, Err(WorkflowError::InvalidPayload(_))));
    }

    /// Test that an approval trail without a matching status breaks the invariants
    #[test]
    fn trail_ahead_of_status_is_detected() {
        let mut req =
            ExpenseRequest::from_draft("exp_1".into(), "EXP-1".into(), &draft()).unwrap();
        req.trail.accountant = Some(AccountantApproval {
            approver_id: "user_bob".into(),
            approved_at: Default::default(),
            notes: None,
            budget_allocation_ids: vec!["ops".into()],
        });

        assert!(matches!(
            req.check_invariants(),
            Err(WorkflowError::InvariantViolation(_))
        ));
    }

    /// Test that history lines name the action and actor
    #[test]
    fn view_history_lists_actions() {
        let mut req =
            ExpenseRequest::from_draft("exp_1".into(), "EXP-1".into(), &draft()).unwrap();
        let alice = Actor::new("user_alice", Role::Staff);
        req.record_witness(&alice, Action::Submit, false).unwrap();

        let lines = req.view_history();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("submit by user_alice (staff)"));
    }
}

// STATE MODULE TESTS
#[cfg(test)]
mod state_tests {
    use super::*;

    /// Test the happy path through every stage
    #[test]
    fn happy_path_through_table() {
        let requester = Actor::new("user_alice", Role::Staff);
        let accountant = Actor::new("user_bob", Role::Accountant);
        let manager = Actor::new("user_carol", Role::Manager);
        let cashier = Actor::new("user_dan", Role::Cashier);

        let s = check_transition(ExpenseStatus::Draft, Action::Submit, &requester, true).unwrap();
        let s = check_transition(s, Action::ApproveAccountant, &accountant, false).unwrap();
        let s = check_transition(s, Action::ApproveManager, &manager, false).unwrap();
        let s = check_transition(s, Action::Process, &cashier, false).unwrap();

        assert_eq!(s, ExpenseStatus::Processed);
        assert!(s.is_terminal());
    }

    /// Test that the error identifies state, action and role
    #[test]
    fn invalid_transition_carries_context() {
        let cashier = Actor::new("user_dan", Role::Cashier);
        let err = check_transition(ExpenseStatus::Submitted, Action::Process, &cashier, false)
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Action 'process' is not permitted for role 'cashier' while the request is SUBMITTED"
        );
    }

    /// Test that a creator sees submit and revise on their draft
    #[test]
    fn creator_actions_on_draft() {
        let requester = Actor::new("user_alice", Role::Staff);
        let actions = available_actions(ExpenseStatus::Draft, &requester, true);

        assert!(actions.contains(&Action::Submit));
        assert!(actions.contains(&Action::Revise));
    }
}

// BUDGET AND TRAIL TESTS
#[cfg(test)]
mod budget_tests {
    use super::*;

    /// Test that availability can go negative after an overspend
    #[test]
    fn available_goes_negative() {
        let mut allocation =
            BudgetAllocation::new("ops", "Operations", "OPS", Money::from_units(600_000));
        allocation.used = Money::from_units(700_000);

        assert_eq!(allocation.available(), Money::from_units(-100_000));
    }

    /// Test that a fitting request produces no warnings
    #[test]
    fn request_within_budget_fits() {
        let allocation = BudgetAllocation::new("ops", "Operations", "OPS", Money::from_units(100));
        let evaluation = attribute(Money::from_units(100), &[allocation]);

        assert!(evaluation.fits());
        assert_eq!(evaluation.total_attributed(), Money::from_units(100));
    }

    /// Test that witnesses hash their CBOR encoding
    #[test]
    fn witness_digest_is_hex_sha256() {
        let witness = Witness::new(
            "exp_1".into(),
            "user_dan".into(),
            Role::Cashier,
            Action::Process,
            None,
        );
        let digest = witness.digest().unwrap();

        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
