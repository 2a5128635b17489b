//! Worker pool that drains planned items through the orchestrator.

use crate::harness::{SubTestResult, SubTestStatus};
use crate::orchestrator::{Orchestrator, TestItem, TestOutcome};
use log::{info, warn};
use std::sync::Mutex;
use std::thread;

/// Result of one item plus the sub-tests reported while it ran.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub name: String,
    pub outcome: TestOutcome,
    pub subtests: Vec<SubTestResult>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<ItemReport>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&TestOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| *o == TestOutcome::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Failed(_)))
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Error(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Skipped(_)))
    }

    pub fn built(&self) -> usize {
        self.count(|o| *o == TestOutcome::Built)
    }

    /// Sub-tests with the given status across every item.
    pub fn subtests(&self, status: SubTestStatus) -> usize {
        self.reports
            .iter()
            .flat_map(|r| &r.subtests)
            .filter(|s| s.result == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(|r| r.outcome.is_failure())
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} items: {} passed, {} failed, {} errors, {} skipped, {} built only; \
             sub-tests: {} passed, {} failed, {} skipped, {} blocked",
            self.reports.len(),
            self.passed(),
            self.failed(),
            self.errors(),
            self.skipped(),
            self.built(),
            self.subtests(SubTestStatus::Pass),
            self.subtests(SubTestStatus::Fail),
            self.subtests(SubTestStatus::Skip),
            self.subtests(SubTestStatus::Block),
        )
    }
}

/// Runs `items` on `jobs` worker threads pulling from one shared queue.
///
/// Reports come back in the order of `items` regardless of completion order.
pub fn run_all(orchestrator: &Orchestrator, items: Vec<TestItem>, jobs: usize) -> RunSummary {
    let total = items.len();
    let jobs = jobs.clamp(1, total.max(1));
    let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
    for (index, item) in items.into_iter().enumerate() {
        // the receiver is alive in this scope
        let _ = queue_tx.send((index, item));
    }
    drop(queue_tx);

    let slots: Mutex<Vec<Option<ItemReport>>> = Mutex::new(vec![None; total]);
    info!("Running {total} items on {jobs} workers");

    thread::scope(|scope| {
        for worker in 0..jobs {
            let queue_rx = queue_rx.clone();
            let slots = &slots;
            scope.spawn(move || {
                for (index, item) in queue_rx.iter() {
                    let mut subtests = Vec::new();
                    let outcome = orchestrator.execute(&item, &mut |_, result| {
                        subtests.push(result.clone());
                    });
                    info!("[{worker}] {} {outcome}", item.name());
                    let report = ItemReport {
                        name: item.name().to_string(),
                        outcome,
                        subtests,
                    };
                    match slots.lock() {
                        Ok(mut slots) => slots[index] = Some(report),
                        Err(poisoned) => poisoned.into_inner()[index] = Some(report),
                    }
                }
            });
        }
    });

    let slots = slots.into_inner().unwrap_or_else(|p| p.into_inner());
    let reports = slots
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    if reports.len() != total {
        warn!("{} items produced no report", total - reports.len());
    }
    RunSummary { reports }
}
