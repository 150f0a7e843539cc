//! Figures derived from the working set. Nothing here is taken from user
//! input; every value is recomputed from the transaction list.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::client::{Client, ClientStatus};
use crate::transaction::{Transaction, TransactionKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    #[ts(type = "string")]
    pub total_income: Decimal,
    #[ts(type = "string")]
    pub total_expenses: Decimal,
    #[ts(type = "string")]
    pub balance: Decimal,
    pub active_clients: usize,
    pub pending_operations: usize,
}

impl FinancialSummary {
    pub fn compute(transactions: &[Transaction], clients: &[Client], pending: usize) -> Self {
        let mut total_income = Decimal::ZERO;
        let mut total_expenses = Decimal::ZERO;
        for tx in transactions {
            match tx.kind {
                TransactionKind::Income => total_income += tx.amount,
                TransactionKind::Expense => total_expenses += tx.amount,
            }
        }
        let active_clients = clients
            .iter()
            .filter(|c| c.status == ClientStatus::Active)
            .count();
        Self {
            total_income,
            total_expenses,
            balance: total_income - total_expenses,
            active_clients,
            pending_operations: pending,
        }
    }
}

/// Refreshes every client's `total_revenue` from the income transactions
/// linked to it by `client_id`. Clients without any linked income end up at
/// zero. Returns whether anything actually changed, so callers can skip
/// rewriting collections that are already up to date.
pub fn recompute_total_revenue(clients: &mut [Client], transactions: &[Transaction]) -> bool {
    let mut earned: HashMap<Uuid, Decimal> = HashMap::new();
    for tx in transactions {
        if tx.kind != TransactionKind::Income {
            continue;
        }
        if let Some(client_id) = tx.client_id {
            *earned.entry(client_id).or_default() += tx.amount;
        }
    }

    let mut changed = false;
    for client in clients.iter_mut() {
        let total = earned.get(&client.id).copied().unwrap_or(Decimal::ZERO);
        if client.total_revenue != total {
            client.total_revenue = total;
            changed = true;
        }
    }
    changed
}
