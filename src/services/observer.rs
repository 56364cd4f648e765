//! Hooks notified once per category decision.

use std::time::Duration;

use uuid::Uuid;

use crate::models::scan::{Decision, ScanCategory};
use crate::models::transaction::TransactionKind;

/// One category evaluated for one transaction.
#[derive(Debug)]
pub struct CategoryEvent<'a> {
    pub invocation_id: Uuid,
    pub kind: TransactionKind,
    pub category: ScanCategory,
    /// Number of targets actually scanned before the category settled.
    pub scanned: usize,
    pub decision: &'a Decision,
    pub duration: Duration,
}

/// Receives category decisions. Implementations must not block.
pub trait ScanObserver: Send + Sync {
    fn on_category(&self, event: &CategoryEvent<'_>);
}

/// Emits each category decision as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ScanObserver for TracingObserver {
    fn on_category(&self, event: &CategoryEvent<'_>) {
        let duration_ms = event.duration.as_millis() as u64;
        match event.decision {
            Decision::Admit => tracing::info!(
                invocation_id = %event.invocation_id,
                kind = %event.kind,
                category = %event.category,
                scanned = event.scanned,
                duration_ms,
                verdict = "clean",
                "Category passed"
            ),
            Decision::Deny(reason) => tracing::warn!(
                invocation_id = %event.invocation_id,
                kind = %event.kind,
                category = %event.category,
                scanned = event.scanned,
                duration_ms,
                verdict = ?reason.cause,
                failed_target = %reason.target,
                "Category denied"
            ),
        }
    }
}
