//! Tables printed by the CLI.

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use migrant_deploy::{
    DeploymentRecord, ExecutionPlan, PendingSubmission, ResolvedArg, SatisfiedDeclaration,
};

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

fn display_arg(arg: &ResolvedArg) -> String {
    match arg {
        ResolvedArg::Value(value) => value.clone(),
        ResolvedArg::Deployed { name, address } => format!("{name} ({address})"),
        ResolvedArg::Produced(name) => format!("<{name}>"),
    }
}

/// Steps to execute, in order.
pub fn plan_table(plan: &ExecutionPlan) -> Table {
    let mut table = table(&["#", "Name", "Artifact", "Arguments", "Depends on"]);
    for step in plan.iter() {
        let args: Vec<_> = step.args.iter().map(display_arg).collect();
        table.add_row(vec![
            step.index.to_string(),
            step.name.clone(),
            step.artifact.artifact_ref().to_string(),
            args.join(", "),
            step.dependencies.join(", "),
        ]);
    }
    table
}

/// Declarations already deployed, with their drift against the current declarations.
pub fn satisfied_table(satisfied: &[SatisfiedDeclaration]) -> Table {
    let mut table = table(&["Name", "Address", "Transaction", "Drift"]);
    for declaration in satisfied {
        table.add_row(vec![
            declaration.name.clone(),
            declaration.address.to_string(),
            declaration.tx_hash.to_string(),
            declaration.drift.to_string(),
        ]);
    }
    table
}

pub fn records_table<'a>(records: impl IntoIterator<Item = &'a DeploymentRecord>) -> Table {
    let mut table = table(&["Name", "Address", "Transaction", "Deployed at"]);
    for record in records {
        table.add_row(vec![
            record.name.clone(),
            record.address.to_string(),
            record.tx_hash.to_string(),
            record.deployed_at.to_string(),
        ]);
    }
    table
}

pub fn pending_table(pending: &[PendingSubmission]) -> Table {
    let mut table = table(&["Name", "Transaction", "Nonce", "Submitted at"]);
    for submission in pending {
        table.add_row(vec![
            submission.name.clone(),
            submission.tx_hash.to_string(),
            submission.nonce.to_string(),
            submission.submitted_at.to_string(),
        ]);
    }
    table
}
