//! Expense request lifecycle: states, roles, actions and the transition table
//!
//! Legality is decided by a single lookup into [`TRANSITIONS`]. Nothing here
//! touches storage; the service layer loads the record, asks
//! [`check_transition`] for the next status and only then applies effects.
use super::error::{WorkflowError, WorkflowResult};
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpenseStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Submitted,
    #[n(2)]
    AccountantApproved,
    #[n(3)]
    ManagerApproved,
    #[n(4)]
    Processed,
    #[n(5)]
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Admin,
    #[n(1)]
    Accountant,
    #[n(2)]
    Manager,
    #[n(3)]
    Cashier,
    // any other dashboard user raising requests
    #[n(4)]
    Staff,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    #[n(0)]
    Submit,
    #[n(1)]
    ApproveAccountant,
    #[n(2)]
    ApproveManager,
    #[n(3)]
    Reject,
    #[n(4)]
    Process,
    #[n(5)]
    Revise,
}

/// The acting user, passed explicitly into every workflow call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

struct Rule {
    from: ExpenseStatus,
    action: Action,
    to: ExpenseStatus,
    roles: &'static [Role],
    // the request's own creator may also perform it
    creator: bool,
}

const TRANSITIONS: &[Rule] = &[
    Rule {
        from: ExpenseStatus::Draft,
        action: Action::Revise,
        to: ExpenseStatus::Draft,
        roles: &[Role::Admin],
        creator: true,
    },
    Rule {
        from: ExpenseStatus::Draft,
        action: Action::Submit,
        to: ExpenseStatus::Submitted,
        roles: &[Role::Admin],
        creator: true,
    },
    Rule {
        from: ExpenseStatus::Submitted,
        action: Action::ApproveAccountant,
        to: ExpenseStatus::AccountantApproved,
        roles: &[Role::Accountant, Role::Admin],
        creator: false,
    },
    Rule {
        from: ExpenseStatus::Submitted,
        action: Action::Reject,
        to: ExpenseStatus::Rejected,
        roles: &[Role::Accountant, Role::Admin],
        creator: false,
    },
    Rule {
        from: ExpenseStatus::AccountantApproved,
        action: Action::ApproveManager,
        to: ExpenseStatus::ManagerApproved,
        roles: &[Role::Manager, Role::Admin],
        creator: false,
    },
    Rule {
        from: ExpenseStatus::AccountantApproved,
        action: Action::Reject,
        to: ExpenseStatus::Rejected,
        roles: &[Role::Manager, Role::Admin],
        creator: false,
    },
    Rule {
        from: ExpenseStatus::ManagerApproved,
        action: Action::Process,
        to: ExpenseStatus::Processed,
        roles: &[Role::Cashier, Role::Admin],
        creator: false,
    },
    Rule {
        from: ExpenseStatus::ManagerApproved,
        action: Action::Reject,
        to: ExpenseStatus::Rejected,
        roles: &[Role::Cashier, Role::Admin],
        creator: false,
    },
];

impl Rule {
    fn permits(&self, actor: &Actor, is_creator: bool) -> bool {
        self.roles.contains(&actor.role) || (self.creator && is_creator)
    }
}

/// Returns the status reached by `action`, or `InvalidTransition` when the
/// combination of status, action and actor is not in the table.
pub fn check_transition(
    status: ExpenseStatus,
    action: Action,
    actor: &Actor,
    is_creator: bool,
) -> WorkflowResult<ExpenseStatus> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.from == status && rule.action == action && rule.permits(actor, is_creator))
        .map(|rule| rule.to)
        .ok_or(WorkflowError::InvalidTransition {
            status,
            action,
            role: actor.role,
        })
}

/// Status reached by `action` from `status`, regardless of who performs it.
pub fn target(status: ExpenseStatus, action: Action) -> Option<ExpenseStatus> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.from == status && rule.action == action)
        .map(|rule| rule.to)
}

/// Actions the dashboard may offer `actor` for a request in `status`.
pub fn available_actions(status: ExpenseStatus, actor: &Actor, is_creator: bool) -> Vec<Action> {
    TRANSITIONS
        .iter()
        .filter(|rule| rule.from == status && rule.permits(actor, is_creator))
        .map(|rule| rule.action)
        .collect()
}

impl ExpenseStatus {
    pub const ALL: [ExpenseStatus; 6] = [
        ExpenseStatus::Draft,
        ExpenseStatus::Submitted,
        ExpenseStatus::AccountantApproved,
        ExpenseStatus::ManagerApproved,
        ExpenseStatus::Processed,
        ExpenseStatus::Rejected,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExpenseStatus::Processed | ExpenseStatus::Rejected)
    }

    /// Position along the approval path. `Rejected` sits outside it.
    pub fn stage(&self) -> Option<u8> {
        match self {
            ExpenseStatus::Draft => Some(0),
            ExpenseStatus::Submitted => Some(1),
            ExpenseStatus::AccountantApproved => Some(2),
            ExpenseStatus::ManagerApproved => Some(3),
            ExpenseStatus::Processed => Some(4),
            ExpenseStatus::Rejected => None,
        }
    }

    /// Label shown on the dashboard. A processed request reads as completed.
    pub fn label(&self) -> &'static str {
        match self {
            ExpenseStatus::Processed => "COMPLETED",
            other => other.as_str(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Draft => "DRAFT",
            ExpenseStatus::Submitted => "SUBMITTED",
            ExpenseStatus::AccountantApproved => "ACCOUNTANT_APPROVED",
            ExpenseStatus::ManagerApproved => "MANAGER_APPROVED",
            ExpenseStatus::Processed => "PROCESSED",
            ExpenseStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(ExpenseStatus::Draft),
            "SUBMITTED" => Ok(ExpenseStatus::Submitted),
            "ACCOUNTANT_APPROVED" => Ok(ExpenseStatus::AccountantApproved),
            "MANAGER_APPROVED" => Ok(ExpenseStatus::ManagerApproved),
            "PROCESSED" | "COMPLETED" => Ok(ExpenseStatus::Processed),
            "REJECTED" => Ok(ExpenseStatus::Rejected),
            other => Err(anyhow::anyhow!("unknown expense status: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Accountant => "accountant",
            Role::Manager => "manager",
            Role::Cashier => "cashier",
            Role::Staff => "staff",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Submit => "submit",
            Action::ApproveAccountant => "approveAccountant",
            Action::ApproveManager => "approveManager",
            Action::Reject => "reject",
            Action::Process => "process",
            Action::Revise => "revise",
        };
        f.write_str(name)
    }
}
