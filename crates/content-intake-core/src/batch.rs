//! Batch operation runner.
//!
//! Every multi-item operator action (save, publish, delete, pin, bulk
//! update) is an [`ItemOperation`] driven by [`run_batch`]. Items run
//! sequentially and independently: one failing item never stops the rest,
//! and nothing is rolled back across items.
//!
//! The result is a [`BatchReport`] whose counters always satisfy
//! `succeeded + skipped + errors.len() == total`. It serializes to the
//! envelope the HTTP API and CLI return:
//!
//! ```json
//! { "success": true, "total": 3, "published": 2, "skipped": 1 }
//! ```
//!
//! The success counter is named after the operation; `errors` is omitted
//! when empty.

use anyhow::Result;
use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Which operator action a batch performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Save,
    Publish,
    Delete,
    Pin,
    Unpin,
    Update,
}

impl BatchOperation {
    /// Envelope key for the success counter.
    pub fn counter_key(&self) -> &'static str {
        match self {
            BatchOperation::Save => "saved",
            BatchOperation::Publish => "published",
            BatchOperation::Delete => "deleted",
            BatchOperation::Pin => "pinned",
            BatchOperation::Unpin => "unpinned",
            BatchOperation::Update => "updated",
        }
    }
}

/// Why an item was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Duplicate,
    NotFound,
}

/// Outcome of applying an operation to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Skipped(SkipReason),
}

/// A per-item operation.
///
/// `apply` returning `Err` marks the item failed; the message is recorded
/// as `"{label}: {error}"`.
#[async_trait]
pub trait ItemOperation<T: Send>: Send {
    fn operation(&self) -> BatchOperation;

    /// Short human label for error messages, usually a title or an id.
    fn label(&self, item: &T) -> String;

    async fn apply(&mut self, item: T) -> Result<ItemOutcome>;
}

/// Aggregated outcome of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub operation: BatchOperation,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn new(operation: BatchOperation) -> Self {
        Self {
            operation,
            total: 0,
            succeeded: 0,
            skipped: 0,
            duplicates: 0,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, label: &str, outcome: Result<ItemOutcome>) {
        self.total += 1;
        match outcome {
            Ok(ItemOutcome::Succeeded) => self.succeeded += 1,
            Ok(ItemOutcome::Skipped(reason)) => {
                self.skipped += 1;
                if reason == SkipReason::Duplicate {
                    self.duplicates += 1;
                }
            }
            Err(e) => self.errors.push(format!("{}: {:#}", label, e)),
        }
    }

    /// Record an item rejected before the operation ran.
    pub fn reject(&mut self, label: &str, message: impl std::fmt::Display) {
        self.total += 1;
        self.errors.push(format!("{}: {}", label, message));
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

impl Serialize for BatchReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.errors.is_empty() { 4 } else { 5 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("success", &true)?;
        map.serialize_entry("total", &self.total)?;
        map.serialize_entry(self.operation.counter_key(), &self.succeeded)?;
        map.serialize_entry("skipped", &self.skipped)?;
        if !self.errors.is_empty() {
            map.serialize_entry("errors", &self.errors)?;
        }
        map.end()
    }
}

/// Apply `op` to every item in order and collect the outcomes.
pub async fn run_batch<T, O>(items: Vec<T>, op: &mut O) -> BatchReport
where
    T: Send,
    O: ItemOperation<T>,
{
    let mut report = BatchReport::new(op.operation());
    for item in items {
        let label = op.label(&item);
        let outcome = op.apply(item).await;
        if let Err(e) = &outcome {
            tracing::warn!(
                operation = op.operation().counter_key(),
                item = %label,
                error = %e,
                "batch item failed"
            );
        }
        report.record(&label, outcome);
    }
    tracing::info!(
        operation = report.operation.counter_key(),
        total = report.total,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed(),
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EveryThird;

    #[async_trait]
    impl ItemOperation<u32> for EveryThird {
        fn operation(&self) -> BatchOperation {
            BatchOperation::Save
        }

        fn label(&self, item: &u32) -> String {
            format!("item {}", item)
        }

        async fn apply(&mut self, item: u32) -> Result<ItemOutcome> {
            match item % 3 {
                0 => Ok(ItemOutcome::Succeeded),
                1 => Ok(ItemOutcome::Skipped(SkipReason::Duplicate)),
                _ => anyhow::bail!("disk full"),
            }
        }
    }

    #[tokio::test]
    async fn counters_always_sum_to_total() {
        for n in [0u32, 1, 2, 7, 30] {
            let report = run_batch((0..n).collect(), &mut EveryThird).await;
            assert_eq!(report.total, n as usize);
            assert_eq!(
                report.succeeded + report.skipped + report.failed(),
                report.total
            );
        }
    }

    #[tokio::test]
    async fn failures_are_labelled_and_do_not_stop_the_batch() {
        let report = run_batch(vec![2, 3, 5], &mut EveryThird).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.errors, vec!["item 2: disk full", "item 5: disk full"]);
    }

    #[test]
    fn envelope_names_counter_after_operation() {
        let mut report = BatchReport::new(BatchOperation::Delete);
        report.record("a", Ok(ItemOutcome::Succeeded));
        report.record("b", Ok(ItemOutcome::Succeeded));
        report.record("missing", Ok(ItemOutcome::Skipped(SkipReason::NotFound)));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "total": 3, "deleted": 2, "skipped": 1})
        );

        report.reject("c", "bad id");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errors"][0], "c: bad id");
    }
}
