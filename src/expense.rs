//! Expense request aggregate, its line items and the draft builder
use super::error::{WorkflowError, WorkflowResult};
use super::money::Money;
use super::state::{self, Action, Actor, ExpenseStatus};
use super::trail::{ApprovalTrail, Witness};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone + Eq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ExpenseItem {
    #[n(0)]
    pub description: String,
    #[n(1)]
    pub category: String,
    #[n(2)]
    pub quantity: u32,
    #[n(3)]
    pub unit_price: Money,
    #[n(4)]
    pub estimated_amount: Money,
}

impl ExpenseItem {
    /// Estimated amount is quantity times unit price. An overflowing product
    /// saturates here and is rejected when the draft is validated.
    pub fn new(description: &str, category: &str, quantity: u32, unit_price: Money) -> Self {
        Self {
            description: description.to_string(),
            category: category.to_string(),
            quantity,
            unit_price,
            estimated_amount: unit_price.saturating_mul(quantity),
        }
    }

    /// Item whose estimate was quoted separately from the unit price.
    pub fn with_estimate(
        description: &str,
        category: &str,
        quantity: u32,
        unit_price: Money,
        estimated_amount: Money,
    ) -> Self {
        Self {
            estimated_amount,
            ..Self::new(description, category, quantity, unit_price)
        }
    }

    fn validate(&self, idx: usize) -> WorkflowResult<()> {
        if self.description.trim().is_empty() {
            return Err(WorkflowError::InvalidPayload(format!(
                "item {} has no description",
                idx + 1
            )));
        }
        if self.quantity == 0 {
            return Err(WorkflowError::InvalidPayload(format!(
                "item {} has zero quantity",
                idx + 1
            )));
        }
        if !self.estimated_amount.is_positive() {
            return Err(WorkflowError::InvalidPayload(format!(
                "item {} must have a positive estimated amount",
                idx + 1
            )));
        }
        if self.unit_price.checked_mul(self.quantity).is_none() {
            return Err(WorkflowError::InvalidPayload(format!(
                "item {} amount is too large",
                idx + 1
            )));
        }
        Ok(())
    }
}

// used for constructing and revising drafts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpenseDraft {
    requester_id: Option<String>,
    department: Option<String>,
    purpose: Option<String>,
    items: Vec<ExpenseItem>,
}

impl ExpenseDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_requester(mut self, requester_id: &str) -> Self {
        self.requester_id = Some(requester_id.to_string());
        self
    }
    pub fn set_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }
    pub fn set_purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_string());
        self
    }
    pub fn add_item(mut self, item: ExpenseItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn items(&self) -> &[ExpenseItem] {
        &self.items
    }

    pub fn requester_id(&self) -> Option<&str> {
        self.requester_id.as_deref()
    }

    /// Checks every required field and returns the header values with the total.
    fn validate(&self) -> WorkflowResult<(&str, &str, &str, Money)> {
        let required = |field: &Option<String>, name: &str| -> WorkflowResult<()> {
            match field {
                Some(value) if !value.trim().is_empty() => Ok(()),
                _ => Err(WorkflowError::InvalidPayload(format!("{} is required", name))),
            }
        };
        required(&self.requester_id, "requester")?;
        required(&self.department, "department")?;
        required(&self.purpose, "purpose")?;

        if self.items.is_empty() {
            return Err(WorkflowError::InvalidPayload(
                "an expense request needs at least one item".into(),
            ));
        }
        for (idx, item) in self.items.iter().enumerate() {
            item.validate(idx)?;
        }
        let total = Money::checked_sum(self.items.iter().map(|i| i.estimated_amount))
            .ok_or_else(|| WorkflowError::InvalidPayload("request total is too large".into()))?;

        Ok((
            self.requester_id.as_deref().unwrap_or_default(),
            self.department.as_deref().unwrap_or_default(),
            self.purpose.as_deref().unwrap_or_default(),
            total,
        ))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ExpenseRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_number: String,
    #[n(2)]
    pub requester_id: String,
    #[n(3)]
    pub department: String,
    #[n(4)]
    pub purpose: String,
    #[n(5)]
    items: Vec<ExpenseItem>,
    // kept equal to the sum of item estimates
    #[n(6)]
    total_estimated: Money,
    #[n(7)]
    pub status: ExpenseStatus,
    #[n(8)]
    pub trail: ApprovalTrail,
    #[n(9)]
    pub history: Vec<Witness>,
    // bumped on every committed write; used for compare-and-swap
    #[n(10)]
    pub version: u64,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

impl ExpenseRequest {
    /// Builds a new request in `Draft` from a validated draft.
    pub fn from_draft(id: String, request_number: String, draft: &ExpenseDraft) -> WorkflowResult<Self> {
        let (requester_id, department, purpose, total_estimated) = draft.validate()?;

        Ok(Self {
            id,
            request_number,
            requester_id: requester_id.to_string(),
            department: department.to_string(),
            purpose: purpose.to_string(),
            items: draft.items.clone(),
            total_estimated,
            status: ExpenseStatus::Draft,
            trail: ApprovalTrail::default(),
            history: vec![],
            version: 0,
            created_at: TimeStamp::new(),
        })
    }

    /// Replaces header and items from a revised draft. The requester never changes.
    pub fn revise(&mut self, draft: &ExpenseDraft) -> WorkflowResult<()> {
        let (requester_id, department, purpose, total_estimated) = draft.validate()?;
        if requester_id != self.requester_id {
            return Err(WorkflowError::InvalidPayload(
                "the requester of a draft cannot be changed".into(),
            ));
        }
        self.department = department.to_string();
        self.purpose = purpose.to_string();
        self.items = draft.items.clone();
        self.total_estimated = total_estimated;
        Ok(())
    }

    pub fn items(&self) -> &[ExpenseItem] {
        &self.items
    }

    pub fn total_estimated(&self) -> Money {
        self.total_estimated
    }

    pub fn items_total(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |acc, i| acc.saturating_add(i.estimated_amount))
    }

    pub fn is_creator(&self, actor: &Actor) -> bool {
        self.requester_id == actor.user_id
    }

    /// Appends a witness for `action`, chained to the previous one.
    pub fn record_witness(
        &mut self,
        actor: &Actor,
        action: Action,
        override_budget_limit: bool,
    ) -> WorkflowResult<()> {
        let prev_digest = match self.history.last() {
            Some(last) => Some(last.digest()?),
            None => None,
        };
        let witness = Witness::new(
            self.id.clone(),
            actor.user_id.clone(),
            actor.role,
            action,
            prev_digest,
        )
        .with_override(override_budget_limit);

        self.history.push(witness);
        Ok(())
    }

    /// Replays the history through the transition table and checks the digest chain.
    pub fn verify_history(&self) -> WorkflowResult<()> {
        let mut status = ExpenseStatus::Draft;
        let mut prev: Option<String> = None;

        for (idx, witness) in self.history.iter().enumerate() {
            if witness.request_id != self.id {
                return Err(WorkflowError::InvariantViolation(format!(
                    "history entry {} belongs to {}",
                    idx, witness.request_id
                )));
            }
            if witness.prev_digest != prev {
                return Err(WorkflowError::InvariantViolation(format!(
                    "history chain broken at entry {}",
                    idx
                )));
            }
            status = state::target(status, witness.action).ok_or_else(|| {
                WorkflowError::InvariantViolation(format!(
                    "history entry {} applies {} to a {} request",
                    idx, witness.action, status
                ))
            })?;
            prev = Some(witness.digest()?);
        }

        if status != self.status {
            return Err(WorkflowError::InvariantViolation(format!(
                "history ends in {} but request is {}",
                status, self.status
            )));
        }
        Ok(())
    }

    /// Checked before every store write.
    pub fn check_invariants(&self) -> WorkflowResult<()> {
        if self.total_estimated != self.items_total() {
            return Err(WorkflowError::InvariantViolation(format!(
                "total {} does not equal item sum {}",
                self.total_estimated,
                self.items_total()
            )));
        }
        self.trail.check_against(self.status)?;
        self.verify_history()
    }

    pub fn view_history(&self) -> Vec<String> {
        self.history
            .iter()
            .map(|w| {
                let mut line = format!(
                    "{} {} by {} ({})",
                    w.timestamp.to_datetime_utc().to_rfc3339(),
                    w.action,
                    w.actor_id,
                    w.role
                );
                if w.override_budget_limit {
                    line.push_str(" [budget override]");
                }
                line
            })
            .collect()
    }

    pub fn to_cbor(&self) -> WorkflowResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(WorkflowError::encode)
    }

    pub fn from_cbor(bytes: &[u8]) -> WorkflowResult<Self> {
        Ok(minicbor::decode(bytes)?)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
