use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    changes_applied: AtomicU64,
    changes_noop: AtomicU64,
    documents_indexed: AtomicU64,
    documents_deleted: AtomicU64,
    index_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_change_applied(&self) {
        self.changes_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_change_noop(&self) {
        self.changes_noop.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_documents_indexed(&self, count: usize) {
        self.documents_indexed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_documents_deleted(&self, count: usize) {
        self.documents_deleted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_index_failure(&self) {
        self.index_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn changes_applied(&self) -> u64 {
        self.changes_applied.load(Ordering::Relaxed)
    }

    pub fn changes_noop(&self) -> u64 {
        self.changes_noop.load(Ordering::Relaxed)
    }

    pub fn documents_indexed(&self) -> u64 {
        self.documents_indexed.load(Ordering::Relaxed)
    }

    pub fn documents_deleted(&self) -> u64 {
        self.documents_deleted.load(Ordering::Relaxed)
    }

    pub fn index_failures(&self) -> u64 {
        self.index_failures.load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        let counters = [
            (
                "gatehouse_permission_changes_applied_total",
                "Permission changes that inserted or deleted a row.",
                self.changes_applied(),
            ),
            (
                "gatehouse_permission_changes_noop_total",
                "Permission changes that had no effect.",
                self.changes_noop(),
            ),
            (
                "gatehouse_documents_indexed_total",
                "Authorization documents written to the search index.",
                self.documents_indexed(),
            ),
            (
                "gatehouse_documents_deleted_total",
                "Authorization documents removed from the search index.",
                self.documents_deleted(),
            ),
            (
                "gatehouse_index_failures_total",
                "Failed search index calls.",
                self.index_failures(),
            ),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {value}\n"));
        }
        output
    }
}
