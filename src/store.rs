//! Storage seams for the workflow and the sled backed implementation
//!
//! Expense requests and budget allocations live in two trees of the same sled
//! database so a `process` transition can write the request and the ledger
//! usage in one transaction.
use super::budget::BudgetAllocation;
use super::error::{Conflict, WorkflowError, WorkflowResult};
use super::expense::ExpenseRequest;
use super::money::Money;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::path::Path;
use std::sync::Arc;

const REQUESTS_TREE: &str = "expense_requests";
const BUDGETS_TREE: &str = "budget_allocations";

/// Ledger usage to commit alongside a request write. `expected_used` and
/// `expected_allocated` are what the budget check saw; the commit aborts if
/// either has moved since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    pub category_id: String,
    pub amount: Money,
    pub expected_used: Money,
    pub expected_allocated: Money,
}

impl LedgerCommit {
    /// Commits `amount` against the allocation as it was read.
    pub fn against(allocation: &BudgetAllocation, amount: Money) -> Self {
        Self {
            category_id: allocation.category_id.clone(),
            amount,
            expected_used: allocation.used,
            expected_allocated: allocation.allocated,
        }
    }
}

pub trait ExpenseRecordStore {
    fn get(&self, id: &str) -> WorkflowResult<ExpenseRequest>;

    /// Stores a brand new record. Fails if the id is already taken.
    fn insert(&self, record: &ExpenseRequest) -> WorkflowResult<()>;

    /// Replaces the stored record only if it still equals `expected`, the copy
    /// the caller read, committing `usage` to the ledger in the same transaction.
    fn compare_and_swap(
        &self,
        expected: &ExpenseRequest,
        record: &ExpenseRequest,
        usage: &[LedgerCommit],
    ) -> WorkflowResult<()>;

    fn list(&self) -> WorkflowResult<Vec<ExpenseRequest>>;

    /// Monotonic sequence for human readable request numbers.
    fn next_sequence(&self) -> WorkflowResult<u64>;
}

pub trait BudgetLedger {
    fn get_allocation(&self, category_id: &str) -> WorkflowResult<Option<BudgetAllocation>>;

    /// Adds `amount` to the category's used total. Limits are not re-checked here;
    /// callers resolve overrides before committing.
    fn commit_usage(&self, category_id: &str, amount: Money) -> WorkflowResult<BudgetAllocation>;
}

#[derive(Clone)]
pub struct SledStore {
    instance: Arc<sled::Db>,
    requests: sled::Tree,
    budgets: sled::Tree,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> WorkflowResult<Self> {
        let requests = instance.open_tree(REQUESTS_TREE)?;
        let budgets = instance.open_tree(BUDGETS_TREE)?;

        Ok(Self {
            instance,
            requests,
            budgets,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> WorkflowResult<Self> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    /// Creates or fully replaces an allocation.
    pub fn put_allocation(&self, allocation: &BudgetAllocation) -> WorkflowResult<()> {
        let cbor = minicbor::to_vec(allocation).map_err(WorkflowError::encode)?;
        self.budgets.insert(allocation.category_id.as_bytes(), cbor)?;
        Ok(())
    }

    /// Changes the allocated ceiling of an existing category, keeping its usage.
    pub fn set_allocated(&self, category_id: &str, allocated: Money) -> WorkflowResult<BudgetAllocation> {
        let result = self.budgets.transaction(|budgets| {
            let mut allocation = read_allocation(budgets, category_id)?;
            allocation.allocated = allocated;
            write_allocation(budgets, &allocation)?;
            Ok(allocation)
        });
        result.map_err(from_transaction_error)
    }

    pub fn list_allocations(&self) -> WorkflowResult<Vec<BudgetAllocation>> {
        self.budgets
            .iter()
            .values()
            .map(|bytes| -> WorkflowResult<BudgetAllocation> { Ok(minicbor::decode(&bytes?)?) })
            .collect()
    }
}

impl ExpenseRecordStore for SledStore {
    fn get(&self, id: &str) -> WorkflowResult<ExpenseRequest> {
        match self.requests.get(id.as_bytes())? {
            Some(bytes) => ExpenseRequest::from_cbor(&bytes),
            None => Err(WorkflowError::NotFound(id.to_string())),
        }
    }

    fn insert(&self, record: &ExpenseRequest) -> WorkflowResult<()> {
        let cbor = record.to_cbor()?;
        self.requests
            .compare_and_swap(record.id.as_bytes(), None as Option<&[u8]>, Some(cbor))?
            .map_err(|_| {
                WorkflowError::InvariantViolation(format!("request id {} already exists", record.id))
            })
    }

    fn compare_and_swap(
        &self,
        expected: &ExpenseRequest,
        record: &ExpenseRequest,
        usage: &[LedgerCommit],
    ) -> WorkflowResult<()> {
        if expected.id != record.id {
            return Err(WorkflowError::InvariantViolation(format!(
                "cannot replace request {} with {}",
                expected.id, record.id
            )));
        }
        let cbor = record.to_cbor()?;

        let result = (&self.requests, &self.budgets).transaction(|(requests, budgets)| {
            let current = match requests.get(record.id.as_bytes())? {
                Some(bytes) => {
                    ExpenseRequest::from_cbor(&bytes).map_err(ConflictableTransactionError::Abort)?
                }
                None => {
                    return Err(ConflictableTransactionError::Abort(WorkflowError::NotFound(
                        record.id.clone(),
                    )));
                }
            };
            if current.version != expected.version {
                return Err(ConflictableTransactionError::Abort(
                    WorkflowError::ConcurrentModification {
                        request_id: record.id.clone(),
                        conflict: Conflict::Version {
                            expected: expected.version,
                            found: current.version,
                        },
                    },
                ));
            }
            // a snapshot edited outside the service must not be written back
            if current != *expected {
                return Err(ConflictableTransactionError::Abort(
                    WorkflowError::ConcurrentModification {
                        request_id: record.id.clone(),
                        conflict: Conflict::Snapshot {
                            version: current.version,
                        },
                    },
                ));
            }

            for commit in usage {
                let mut allocation = read_allocation(budgets, &commit.category_id)?;
                if allocation.used != commit.expected_used {
                    return Err(ConflictableTransactionError::Abort(
                        WorkflowError::ConcurrentModification {
                            request_id: record.id.clone(),
                            conflict: Conflict::Ledger {
                                category_id: commit.category_id.clone(),
                                expected_used: commit.expected_used,
                                found_used: allocation.used,
                            },
                        },
                    ));
                }
                if allocation.allocated != commit.expected_allocated {
                    return Err(ConflictableTransactionError::Abort(
                        WorkflowError::ConcurrentModification {
                            request_id: record.id.clone(),
                            conflict: Conflict::Allocation {
                                category_id: commit.category_id.clone(),
                                expected_allocated: commit.expected_allocated,
                                found_allocated: allocation.allocated,
                            },
                        },
                    ));
                }
                allocation.used = add_usage(&allocation, commit.amount)?;
                write_allocation(budgets, &allocation)?;
            }

            requests.insert(record.id.as_bytes(), cbor.as_slice())?;
            Ok(())
        });

        result.map_err(from_transaction_error)
    }

    fn list(&self) -> WorkflowResult<Vec<ExpenseRequest>> {
        self.requests
            .iter()
            .values()
            .map(|bytes| -> WorkflowResult<ExpenseRequest> { ExpenseRequest::from_cbor(&bytes?) })
            .collect()
    }

    fn next_sequence(&self) -> WorkflowResult<u64> {
        // generate_id starts at zero
        Ok(self.instance.generate_id()? + 1)
    }
}

impl BudgetLedger for SledStore {
    fn get_allocation(&self, category_id: &str) -> WorkflowResult<Option<BudgetAllocation>> {
        match self.budgets.get(category_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn commit_usage(&self, category_id: &str, amount: Money) -> WorkflowResult<BudgetAllocation> {
        let result = self.budgets.transaction(|budgets| {
            let mut allocation = read_allocation(budgets, category_id)?;
            allocation.used = add_usage(&allocation, amount)?;
            write_allocation(budgets, &allocation)?;
            Ok(allocation)
        });
        result.map_err(from_transaction_error)
    }
}

fn read_allocation(
    budgets: &TransactionalTree,
    category_id: &str,
) -> Result<BudgetAllocation, ConflictableTransactionError<WorkflowError>> {
    match budgets.get(category_id.as_bytes())? {
        Some(bytes) => minicbor::decode(&bytes)
            .map_err(|e| ConflictableTransactionError::Abort(WorkflowError::Decode(e))),
        None => Err(ConflictableTransactionError::Abort(WorkflowError::InvalidPayload(
            format!("unknown budget category: {}", category_id),
        ))),
    }
}

fn add_usage(
    allocation: &BudgetAllocation,
    amount: Money,
) -> Result<Money, ConflictableTransactionError<WorkflowError>> {
    allocation.used.checked_add(amount).ok_or_else(|| {
        ConflictableTransactionError::Abort(WorkflowError::InvalidPayload(format!(
            "usage of budget category {} would overflow",
            allocation.category_id
        )))
    })
}

fn write_allocation(
    budgets: &TransactionalTree,
    allocation: &BudgetAllocation,
) -> Result<(), ConflictableTransactionError<WorkflowError>> {
    let cbor = minicbor::to_vec(allocation)
        .map_err(|e| ConflictableTransactionError::Abort(WorkflowError::encode(e)))?;
    budgets.insert(allocation.category_id.as_bytes(), cbor)?;
    Ok(())
}

fn from_transaction_error(err: TransactionError<WorkflowError>) -> WorkflowError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => WorkflowError::Storage(err),
    }
}
