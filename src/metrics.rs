use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, OnceLock},
};

use crate::service::reconciliation::ReconciliationKind;

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

struct MetricsState {
    total: u64,
    errors: u64,
    per_endpoint: HashMap<&'static str, u64>,
    per_endpoint_err: HashMap<&'static str, u64>,
    // 结算流程
    topup_ok: u64,
    withdrawal_ok: u64,
    coins_credited: u64,
    coins_debited: u64,
    compensations: u64,
    failures_by_kind: HashMap<&'static str, u64>,
    reconciliation_by_kind: HashMap<&'static str, u64>,
}

fn state() -> MutexGuard<'static, MetricsState> {
    let lock = METRICS.get_or_init(|| {
        Mutex::new(MetricsState {
            total: 0,
            errors: 0,
            per_endpoint: HashMap::new(),
            per_endpoint_err: HashMap::new(),
            topup_ok: 0,
            withdrawal_ok: 0,
            coins_credited: 0,
            coins_debited: 0,
            compensations: 0,
            failures_by_kind: HashMap::new(),
            reconciliation_by_kind: HashMap::new(),
        })
    });
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

pub fn count_ok(endpoint: &'static str) {
    let mut s = state();
    s.total += 1;
    *s.per_endpoint.entry(endpoint).or_insert(0) += 1;
}

pub fn count_err(endpoint: &'static str) {
    let mut s = state();
    s.total += 1;
    s.errors += 1;
    *s.per_endpoint.entry(endpoint).or_insert(0) += 1;
    *s.per_endpoint_err.entry(endpoint).or_insert(0) += 1;
}

pub fn inc_topup(coins: u64) {
    let mut s = state();
    s.topup_ok += 1;
    s.coins_credited += coins;
}

pub fn inc_withdrawal(coins: u64) {
    let mut s = state();
    s.withdrawal_ok += 1;
    s.coins_debited += coins;
}

pub fn inc_compensation() {
    state().compensations += 1;
}

pub fn inc_failure(kind: &'static str) {
    *state().failures_by_kind.entry(kind).or_insert(0) += 1;
}

pub fn inc_reconciliation(kind: ReconciliationKind) {
    let label = match kind {
        ReconciliationKind::CreditFailedAfterTransfer => "credit_failed_after_transfer",
        ReconciliationKind::ReversalFailed => "reversal_failed",
        ReconciliationKind::OutcomeUnknown => "outcome_unknown",
    };
    *state().reconciliation_by_kind.entry(label).or_insert(0) += 1;
}

fn push_counter(out: &mut String, name: &str, help: &str) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    push_counter(&mut out, "coinbridge_requests_total", "Total requests");
    out.push_str(&format!("coinbridge_requests_total {}\n", s.total));

    push_counter(&mut out, "coinbridge_errors_total", "Total error responses");
    out.push_str(&format!("coinbridge_errors_total {}\n", s.errors));

    push_counter(&mut out, "coinbridge_endpoint_requests_total", "Requests per endpoint");
    for (k, v) in s.per_endpoint.iter() {
        out.push_str(&format!(
            "coinbridge_endpoint_requests_total{{endpoint=\"{}\"}} {}\n",
            k, v
        ));
    }

    push_counter(&mut out, "coinbridge_endpoint_errors_total", "Errors per endpoint");
    for (k, v) in s.per_endpoint_err.iter() {
        out.push_str(&format!(
            "coinbridge_endpoint_errors_total{{endpoint=\"{}\"}} {}\n",
            k, v
        ));
    }

    push_counter(&mut out, "coinbridge_settlements_total", "Successful settlements");
    out.push_str(&format!(
        "coinbridge_settlements_total{{flow=\"topup\"}} {}\n",
        s.topup_ok
    ));
    out.push_str(&format!(
        "coinbridge_settlements_total{{flow=\"withdrawal\"}} {}\n",
        s.withdrawal_ok
    ));

    push_counter(&mut out, "coinbridge_coins_total", "Coins moved by successful settlements");
    out.push_str(&format!(
        "coinbridge_coins_total{{direction=\"credited\"}} {}\n",
        s.coins_credited
    ));
    out.push_str(&format!(
        "coinbridge_coins_total{{direction=\"debited\"}} {}\n",
        s.coins_debited
    ));

    push_counter(&mut out, "coinbridge_compensations_total", "Withdrawal debits reversed");
    out.push_str(&format!("coinbridge_compensations_total {}\n", s.compensations));

    push_counter(&mut out, "coinbridge_failures_total", "Failed settlements by error kind");
    for (k, v) in s.failures_by_kind.iter() {
        out.push_str(&format!("coinbridge_failures_total{{kind=\"{}\"}} {}\n", k, v));
    }

    push_counter(
        &mut out,
        "coinbridge_reconciliation_total",
        "Records requiring operator reconciliation",
    );
    for (k, v) in s.reconciliation_by_kind.iter() {
        out.push_str(&format!(
            "coinbridge_reconciliation_total{{kind=\"{}\"}} {}\n",
            k, v
        ));
    }

    out
}
