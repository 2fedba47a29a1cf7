//! Approval trail and the audit history of an expense request
use super::budget::Attribution;
use super::error::{WorkflowError, WorkflowResult};
use super::expense::TimeStamp;
use super::state::{Action, ExpenseStatus, Role};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AccountantApproval {
    #[n(0)]
    pub approver_id: String,
    #[n(1)]
    pub approved_at: TimeStamp<Utc>,
    #[n(2)]
    pub notes: Option<String>,
    // in the order chosen; the cashier stage charges them in this order
    #[n(3)]
    pub budget_allocation_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ManagerApproval {
    #[n(0)]
    pub approver_id: String,
    #[n(1)]
    pub approved_at: TimeStamp<Utc>,
    #[n(2)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CashierProcessing {
    #[n(0)]
    pub processor_id: String,
    #[n(1)]
    pub processor_role: Role,
    #[n(2)]
    pub processed_at: TimeStamp<Utc>,
    #[n(3)]
    pub transaction_reference: String,
    #[n(4)]
    pub notes: Option<String>,
    #[n(5)]
    pub override_budget_limit: bool,
    // what was actually committed to the ledger
    #[n(6)]
    pub attributions: Vec<Attribution>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Rejection {
    #[n(0)]
    pub rejected_by: String,
    #[n(1)]
    pub role: Role,
    #[n(2)]
    pub reason: String,
    #[n(3)]
    pub rejected_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalTrail {
    #[n(0)]
    pub accountant: Option<AccountantApproval>,
    #[n(1)]
    pub manager: Option<ManagerApproval>,
    #[n(2)]
    pub cashier: Option<CashierProcessing>,
    #[n(3)]
    pub rejection: Option<Rejection>,
}

impl ApprovalTrail {
    /// Checks that stage records exist exactly for the stages `status` has passed.
    ///
    /// A rejected request keeps whatever stages it passed before rejection, so
    /// only the cashier record is ruled out there.
    pub fn check_against(&self, status: ExpenseStatus) -> WorkflowResult<()> {
        let (accountant, manager, cashier, rejection) = match status {
            ExpenseStatus::Draft | ExpenseStatus::Submitted => (false, false, false, false),
            ExpenseStatus::AccountantApproved => (true, false, false, false),
            ExpenseStatus::ManagerApproved => (true, true, false, false),
            ExpenseStatus::Processed => (true, true, true, false),
            ExpenseStatus::Rejected => {
                if self.rejection.is_none() || self.cashier.is_some() {
                    return Err(WorkflowError::InvariantViolation(
                        "rejected request must carry a rejection and no processing record".into(),
                    ));
                }
                if self.manager.is_some() && self.accountant.is_none() {
                    return Err(WorkflowError::InvariantViolation(
                        "manager approval recorded without accountant approval".into(),
                    ));
                }
                return Ok(());
            }
        };

        let populated = (
            self.accountant.is_some(),
            self.manager.is_some(),
            self.cashier.is_some(),
            self.rejection.is_some(),
        );
        if populated != (accountant, manager, cashier, rejection) {
            return Err(WorkflowError::InvariantViolation(format!(
                "approval trail does not match status {}",
                status
            )));
        }
        Ok(())
    }
}

/// One entry in the audit history. Each witness carries the digest of the one
/// before it, so the history can be checked for gaps or edits.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Witness {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub actor_id: String,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub action: Action,
    #[n(4)]
    pub timestamp: TimeStamp<Utc>,
    #[n(5)]
    pub override_budget_limit: bool,
    #[n(6)]
    pub prev_digest: Option<String>,
}

impl Witness {
    pub fn new(
        request_id: String,
        actor_id: String,
        role: Role,
        action: Action,
        prev_digest: Option<String>,
    ) -> Self {
        Self {
            request_id,
            actor_id,
            role,
            action,
            timestamp: TimeStamp::new(),
            override_budget_limit: false,
            prev_digest,
        }
    }

    pub fn with_override(mut self, override_budget_limit: bool) -> Self {
        self.override_budget_limit = override_budget_limit;
        self
    }

    pub fn digest(&self) -> WorkflowResult<String> {
        let cbor = minicbor::to_vec(self).map_err(WorkflowError::encode)?;
        Ok(sha256::digest(&cbor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_changes_with_content() {
        let a = Witness::new("exp_1".into(), "user_1".into(), Role::Cashier, Action::Process, None);
        let b = a.clone().with_override(true);

        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap(), a.clone().digest().unwrap());
    }

    #[test]
    fn empty_trail_matches_submitted_only() {
        let trail = ApprovalTrail::default();
        assert!(trail.check_against(ExpenseStatus::Submitted).is_ok());
        assert!(trail.check_against(ExpenseStatus::AccountantApproved).is_err());
        assert!(trail.check_against(ExpenseStatus::Rejected).is_err());
    }
}
