//! Walks one expense request through the whole approval workflow, ending with
//! an authorised overspend at the cashier stage.
//!
//! Run with `cargo run --example workflow [config.json]`.

use expense_approval::{
    WorkflowError,
    budget::BudgetAllocation,
    config::WorkflowConfig,
    expense::{ExpenseDraft, ExpenseItem},
    logging,
    money::Money,
    service::ExpenseService,
    state::{Actor, Role},
    utils,
};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("expense-approval.json"));
    let config = WorkflowConfig::load_or_default(&config_path)?.with_env_overrides();
    logging::init_logging(&config.log_filter)?;

    let service = ExpenseService::open(&config)?;

    let mut operations =
        BudgetAllocation::new("ops", "Operations", "OPS-01", Money::from_units(600_000));
    operations.used = Money::from_units(200_000);
    service.store().put_allocation(&operations)?;

    let requester = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::Staff);
    let accountant = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::Accountant);
    let manager = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::Manager);
    let cashier = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::Cashier);

    let draft = ExpenseDraft::new()
        .set_department("Loans")
        .set_purpose("Replacement laptops for the loans desk")
        .add_item(ExpenseItem::new(
            "Laptop",
            "equipment",
            2,
            Money::from_units(250_000),
        ));
    let request = service.create_draft(&requester, draft)?;
    println!("created {} for {}", request.request_number, request.total_estimated());

    service.submit(&requester, &request.id)?;

    let outcome = service.approve_accountant(&accountant, &request.id, vec!["ops".into()], None)?;
    for warning in &outcome.warnings {
        println!("warning: {}", serde_json::to_string(warning)?);
    }

    service.approve_manager(&manager, &request.id, Some("urgent".into()))?;

    match service.process(&cashier, &request.id, "TXN-DEMO-1", None, false) {
        Err(WorkflowError::BudgetExceeded { warnings }) => {
            println!("blocked: {} categor(ies) over budget, retrying with override", warnings.len());
            service.process(
                &cashier,
                &request.id,
                "TXN-DEMO-1",
                Some("approved by board".into()),
                true,
            )?;
        }
        other => {
            other?;
        }
    }

    let stored = service.get(&request.id)?;
    println!("{} is {}", stored.request_number, stored.status.label());
    for line in stored.view_history() {
        println!("  {}", line);
    }

    for allocation in service.store().list_allocations()? {
        println!(
            "{} ({}) allocated {} used {} available {}",
            allocation.name,
            allocation.code,
            allocation.allocated,
            allocation.used,
            allocation.available()
        );
    }

    Ok(())
}
