use std::fmt::Write;

use anyhow::Result;
use ledger_engine::{
    db_types::{Account, LedgerAlert, Transaction},
    ledger_objects::{AuditReport, SubscriptionStatusView, SweepReport},
};
use prettytable::{
    format::{LinePosition, LineSeparator, TableFormat},
    row,
    Table,
};

fn markdown_format() -> TableFormat {
    prettytable::format::FormatBuilder::new()
        .column_separator('|')
        .borders('|')
        .separator(LinePosition::Title, LineSeparator::new('-', '|', '|', '|'))
        .padding(1, 1)
        .build()
}

pub fn format_account(account: &Account, history: &[Transaction]) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "===============================================================================")?;
    writeln!(f, "Account #{} for {}", account.id, account.user_id)?;
    writeln!(f, "Balance: {}", account.balance)?;
    writeln!(f, "===============================================================================")?;
    f.write_str(&format_transactions(history))?;
    Ok(f)
}

pub fn format_transactions(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions\n".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["ID", "Kind", "Amount", "Cur", "Status", "Gateway", "Gateway ref", "Created At", "Note"]);
    transactions.iter().for_each(|tx| {
        let note = match (&tx.failure_reason, tx.cancel_requested) {
            (Some(reason), _) => reason.clone(),
            (None, true) => "cancel requested".to_string(),
            (None, false) => String::default(),
        };
        table.add_row(row![
            tx.id,
            tx.kind.to_string(),
            tx.amount.to_string(),
            tx.currency,
            tx.status.to_string(),
            tx.gateway.to_string(),
            tx.gateway_ref.to_string(),
            tx.created_at.to_string(),
            note
        ]);
    });
    table.set_format(markdown_format());
    format!("{table}\n")
}

pub fn format_audit(report: &AuditReport) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Account #{} ({})", report.account_id, report.user_id)?;
    writeln!(f, "Stored balance:    {:>12}", report.balance.to_string())?;
    writeln!(f, "Settled credits:   {:>12}", report.settled_credits.to_string())?;
    writeln!(f, "Settled debits:    {:>12}", report.settled_debits.to_string())?;
    writeln!(f, "Expected balance:  {:>12}", report.expected_balance().to_string())?;
    writeln!(f, "Pending:           {:>12}", report.pending_transactions)?;
    let verdict = if report.is_consistent() { "CONSISTENT" } else { "INCONSISTENT" };
    writeln!(f, "Result: {verdict}")?;
    Ok(f)
}

pub fn format_alerts(alerts: &[LedgerAlert]) -> String {
    if alerts.is_empty() {
        return "No open alerts\n".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["ID", "Kind", "Gateway ref", "Tx", "Detail", "Raised At", "Ack"]);
    alerts.iter().for_each(|alert| {
        table.add_row(row![
            alert.id,
            alert.kind.to_string(),
            alert.gateway_ref.to_string(),
            alert.transaction_id.map(|id| id.to_string()).unwrap_or_default(),
            alert.detail,
            alert.created_at.to_string(),
            if alert.acknowledged { "yes" } else { "" }
        ]);
    });
    table.set_format(markdown_format());
    format!("{table}\n")
}

pub fn format_subscription_status(status: &SubscriptionStatusView) -> Result<String> {
    let mut f = String::new();
    match (&status.subscription, status.is_premium) {
        (Some(sub), true) => {
            writeln!(f, "{} is premium ({} plan)", status.user_id, sub.plan_type)?;
            writeln!(f, "Subscription #{} ends {} ({} days left)", sub.id, sub.end_date, status.days_remaining)?;
        },
        (Some(sub), false) => {
            writeln!(f, "{} is not premium. Subscription #{} lapsed on {}", status.user_id, sub.id, sub.end_date)?;
        },
        (None, _) => writeln!(f, "{} has no active subscription", status.user_id)?,
    }
    Ok(f)
}

pub fn format_sweep(report: &SweepReport) -> String {
    format!(
        "Examined {} pending transactions: {} resolved, {} still pending, {} errors",
        report.examined, report.resolved, report.still_pending, report.errors
    )
}
