//! Service layer API for expense workflow operations
//!
//! [`ExpenseService::apply_transition`] is the single entry point for moving a
//! request through its lifecycle. It loads the record, checks legality against
//! the transition table, validates the stage payload, runs the budget check
//! where the stage needs one and writes everything back with one
//! compare-and-swap. Any failure before the write leaves the store untouched.
use super::budget::{self, BudgetAllocation, BudgetEvaluation, BudgetWarning, Enforcement};
use super::config::WorkflowConfig;
use super::error::{WorkflowError, WorkflowResult};
use super::expense::{ExpenseDraft, ExpenseRequest, TimeStamp};
use super::state::{self, Action, Actor, ExpenseStatus, Role};
use super::store::{BudgetLedger, ExpenseRecordStore, LedgerCommit, SledStore};
use super::trail::{AccountantApproval, CashierProcessing, ManagerApproval, Rejection};
use super::utils;
use std::collections::HashSet;

/// A requested action together with its stage specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Submit,
    ApproveAccountant {
        budget_allocation_ids: Vec<String>,
        notes: Option<String>,
    },
    ApproveManager {
        notes: Option<String>,
    },
    Reject {
        reason: String,
    },
    Process {
        transaction_details: String,
        notes: Option<String>,
        override_budget_limit: bool,
    },
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub status: ExpenseStatus,
    /// Budget warnings raised at this stage. Empty when the request fits.
    pub warnings: Vec<BudgetWarning>,
    pub request: ExpenseRequest,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<ExpenseStatus>,
    pub requester_id: Option<String>,
}

pub struct ExpenseService<S = SledStore> {
    store: S,
    config: WorkflowConfig,
}

impl Transition {
    pub fn action(&self) -> Action {
        match self {
            Transition::Submit => Action::Submit,
            Transition::ApproveAccountant { .. } => Action::ApproveAccountant,
            Transition::ApproveManager { .. } => Action::ApproveManager,
            Transition::Reject { .. } => Action::Reject,
            Transition::Process { .. } => Action::Process,
        }
    }

    fn validate_payload(&self) -> WorkflowResult<()> {
        match self {
            Transition::ApproveAccountant {
                budget_allocation_ids,
                ..
            } => {
                if budget_allocation_ids.is_empty() {
                    return Err(WorkflowError::InvalidPayload(
                        "select at least one budget allocation".into(),
                    ));
                }
                let mut seen = HashSet::new();
                for id in budget_allocation_ids {
                    if id.trim().is_empty() {
                        return Err(WorkflowError::InvalidPayload(
                            "budget allocation id must not be blank".into(),
                        ));
                    }
                    if !seen.insert(id.as_str()) {
                        return Err(WorkflowError::InvalidPayload(format!(
                            "budget allocation {} selected twice",
                            id
                        )));
                    }
                }
                Ok(())
            }
            Transition::Reject { reason } if reason.trim().is_empty() => Err(
                WorkflowError::InvalidPayload("a rejection reason is required".into()),
            ),
            Transition::Process {
                transaction_details,
                ..
            } if transaction_details.trim().is_empty() => Err(WorkflowError::InvalidPayload(
                "transaction details are required".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl ExpenseService<SledStore> {
    /// Opens the sled database named in `config`.
    pub fn open(config: &WorkflowConfig) -> WorkflowResult<Self> {
        let store = SledStore::open(&config.db_path)?;
        Ok(Self::new(store, config.clone()))
    }
}

impl<S> ExpenseService<S>
where
    S: ExpenseRecordStore + BudgetLedger,
{
    pub fn new(store: S, config: WorkflowConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, request_id: &str) -> WorkflowResult<ExpenseRequest> {
        self.store.get(request_id)
    }

    /// Creates a request in `Draft`. The requester defaults to the actor; only an
    /// admin may raise a request on someone else's behalf.
    pub fn create_draft(&self, actor: &Actor, draft: ExpenseDraft) -> WorkflowResult<ExpenseRequest> {
        let requester = draft.requester_id().map(str::to_string);
        let draft = match requester {
            None => draft.set_requester(&actor.user_id),
            Some(requester) if requester == actor.user_id || actor.role == Role::Admin => draft,
            Some(_) => {
                return Err(WorkflowError::InvalidPayload(
                    "requests can only be raised for yourself".into(),
                ));
            }
        };

        let id = utils::new_uuid_to_bech32(&self.config.id_prefix)
            .map_err(|e| WorkflowError::Config(format!("invalid id prefix: {}", e)))?;
        let number =
            utils::format_request_number(&self.config.request_number_prefix, self.store.next_sequence()?);

        let request = ExpenseRequest::from_draft(id, number, &draft)?;
        request.check_invariants()?;
        self.store.insert(&request)?;

        tracing::info!(
            request_id = %request.id,
            request_number = %request.request_number,
            requester = %request.requester_id,
            total = %request.total_estimated(),
            "expense draft created"
        );
        Ok(request)
    }

    /// Replaces the contents of a draft. Only the creator or an admin may revise,
    /// and only while the request is still a draft.
    pub fn revise_draft(
        &self,
        actor: &Actor,
        request_id: &str,
        draft: ExpenseDraft,
    ) -> WorkflowResult<ExpenseRequest> {
        let current = self.store.get(request_id)?;
        state::check_transition(current.status, Action::Revise, actor, current.is_creator(actor))?;

        // the requester is fixed at creation
        let draft = if draft.requester_id().is_none() {
            draft.set_requester(&current.requester_id)
        } else {
            draft
        };

        let mut next = current.clone();
        next.revise(&draft)?;
        next.record_witness(actor, Action::Revise, false)?;
        next.version = current.version + 1;
        next.check_invariants()?;

        self.store.compare_and_swap(&current, &next, &[])?;

        tracing::info!(
            request_id = %next.id,
            actor = %actor.user_id,
            total = %next.total_estimated(),
            "expense draft revised"
        );
        Ok(next)
    }

    pub fn list_requests(&self, filter: &ListFilter) -> WorkflowResult<Vec<ExpenseRequest>> {
        let mut requests: Vec<ExpenseRequest> = self
            .store
            .list()?
            .into_iter()
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .filter(|r| {
                filter
                    .requester_id
                    .as_ref()
                    .is_none_or(|id| &r.requester_id == id)
            })
            .collect();
        // creation order; request numbers break ties
        requests.sort_by(|a, b| {
            (&a.created_at, &a.request_number).cmp(&(&b.created_at, &b.request_number))
        });
        Ok(requests)
    }

    /// Advisory budget check for a request against the given categories,
    /// without changing anything.
    pub fn preview_budget(
        &self,
        request_id: &str,
        budget_allocation_ids: &[String],
    ) -> WorkflowResult<BudgetEvaluation> {
        let request = self.store.get(request_id)?;
        let allocations = self.load_allocations(budget_allocation_ids)?;
        budget::evaluate(request.total_estimated(), &allocations, Enforcement::Advisory)
    }

    /// Loads the request and applies `transition` on behalf of `actor`.
    pub fn apply_transition(
        &self,
        actor: &Actor,
        request_id: &str,
        transition: Transition,
    ) -> WorkflowResult<TransitionOutcome> {
        let current = self.store.get(request_id)?;
        self.apply_transition_to(actor, &current, transition)
    }

    /// Applies `transition` to a request previously read from the store.
    ///
    /// The write only succeeds if the stored record still equals `current`;
    /// otherwise the caller gets `ConcurrentModification` and should re-read.
    /// A `current` that was altered after reading is refused the same way.
    pub fn apply_transition_to(
        &self,
        actor: &Actor,
        current: &ExpenseRequest,
        transition: Transition,
    ) -> WorkflowResult<TransitionOutcome> {
        let action = transition.action();
        let next_status =
            state::check_transition(current.status, action, actor, current.is_creator(actor))?;
        transition.validate_payload()?;

        tracing::debug!(
            request_id = %current.id,
            from = %current.status,
            to = %next_status,
            %action,
            role = %actor.role,
            "transition permitted"
        );

        let mut next = current.clone();
        let mut warnings = vec![];
        let mut usage: Vec<LedgerCommit> = vec![];
        let mut override_used = false;

        match transition {
            Transition::Submit => {}
            Transition::ApproveAccountant {
                budget_allocation_ids,
                notes,
            } => {
                let allocations = self.load_allocations(&budget_allocation_ids)?;
                let evaluation = budget::evaluate(
                    current.total_estimated(),
                    &allocations,
                    Enforcement::Advisory,
                )?;
                if !evaluation.fits() {
                    tracing::warn!(
                        request_id = %current.id,
                        deficit = %evaluation.total_deficit(),
                        "approved, but budget will be exceeded"
                    );
                }
                warnings = evaluation.warnings;
                next.trail.accountant = Some(AccountantApproval {
                    approver_id: actor.user_id.clone(),
                    approved_at: TimeStamp::new(),
                    notes,
                    budget_allocation_ids,
                });
            }
            Transition::ApproveManager { notes } => {
                next.trail.manager = Some(ManagerApproval {
                    approver_id: actor.user_id.clone(),
                    approved_at: TimeStamp::new(),
                    notes,
                });
            }
            Transition::Reject { reason } => {
                next.trail.rejection = Some(Rejection {
                    rejected_by: actor.user_id.clone(),
                    role: actor.role,
                    reason,
                    rejected_at: TimeStamp::new(),
                });
            }
            Transition::Process {
                transaction_details,
                notes,
                override_budget_limit,
            } => {
                let category_ids = current
                    .trail
                    .accountant
                    .as_ref()
                    .map(|a| a.budget_allocation_ids.clone())
                    .ok_or_else(|| {
                        WorkflowError::InvariantViolation(
                            "approved request has no accountant budget selection".into(),
                        )
                    })?;
                let allocations = self.load_allocations(&category_ids)?;
                let evaluation = budget::evaluate(
                    current.total_estimated(),
                    &allocations,
                    Enforcement::Binding {
                        override_budget_limit,
                    },
                )?;
                if !evaluation.fits() {
                    tracing::warn!(
                        request_id = %current.id,
                        actor = %actor.user_id,
                        role = %actor.role,
                        deficit = %evaluation.total_deficit(),
                        "budget limit overridden"
                    );
                }

                usage = evaluation
                    .attributions
                    .iter()
                    .map(|attribution| {
                        allocations
                            .iter()
                            .find(|a| a.category_id == attribution.category_id)
                            .map(|a| LedgerCommit::against(a, attribution.amount))
                            .ok_or_else(|| {
                                WorkflowError::InvariantViolation(format!(
                                    "attribution to unselected category {}",
                                    attribution.category_id
                                ))
                            })
                    })
                    .collect::<WorkflowResult<_>>()?;
                override_used = override_budget_limit;
                warnings = evaluation.warnings;
                next.trail.cashier = Some(CashierProcessing {
                    processor_id: actor.user_id.clone(),
                    processor_role: actor.role,
                    processed_at: TimeStamp::new(),
                    transaction_reference: transaction_details,
                    notes,
                    override_budget_limit,
                    attributions: evaluation.attributions,
                });
            }
        }

        next.status = next_status;
        next.record_witness(actor, action, override_used)?;
        next.version = current.version + 1;
        next.check_invariants()?;

        self.store.compare_and_swap(current, &next, &usage)?;

        tracing::info!(
            request_id = %next.id,
            %action,
            actor = %actor.user_id,
            role = %actor.role,
            status = %next.status,
            warnings = warnings.len(),
            "transition committed"
        );

        Ok(TransitionOutcome {
            status: next.status,
            warnings,
            request: next,
        })
    }

    pub fn submit(&self, actor: &Actor, request_id: &str) -> WorkflowResult<TransitionOutcome> {
        self.apply_transition(actor, request_id, Transition::Submit)
    }

    pub fn approve_accountant(
        &self,
        actor: &Actor,
        request_id: &str,
        budget_allocation_ids: Vec<String>,
        notes: Option<String>,
    ) -> WorkflowResult<TransitionOutcome> {
        self.apply_transition(
            actor,
            request_id,
            Transition::ApproveAccountant {
                budget_allocation_ids,
                notes,
            },
        )
    }

    pub fn approve_manager(
        &self,
        actor: &Actor,
        request_id: &str,
        notes: Option<String>,
    ) -> WorkflowResult<TransitionOutcome> {
        self.apply_transition(actor, request_id, Transition::ApproveManager { notes })
    }

    pub fn reject(
        &self,
        actor: &Actor,
        request_id: &str,
        reason: &str,
    ) -> WorkflowResult<TransitionOutcome> {
        self.apply_transition(
            actor,
            request_id,
            Transition::Reject {
                reason: reason.to_string(),
            },
        )
    }

    pub fn process(
        &self,
        actor: &Actor,
        request_id: &str,
        transaction_details: &str,
        notes: Option<String>,
        override_budget_limit: bool,
    ) -> WorkflowResult<TransitionOutcome> {
        self.apply_transition(
            actor,
            request_id,
            Transition::Process {
                transaction_details: transaction_details.to_string(),
                notes,
                override_budget_limit,
            },
        )
    }

    /// Allocations in the order given. Unknown ids are a payload error.
    fn load_allocations(&self, category_ids: &[String]) -> WorkflowResult<Vec<BudgetAllocation>> {
        category_ids
            .iter()
            .map(|id| {
                self.store.get_allocation(id)?.ok_or_else(|| {
                    WorkflowError::InvalidPayload(format!("unknown budget category: {}", id))
                })
            })
            .collect()
    }
}
