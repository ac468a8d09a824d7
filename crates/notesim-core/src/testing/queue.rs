//! In-memory substrate: workflow queue and step journal.

use async_trait::async_trait;
use notesim_proto::{
    DispatchArgs, EnqueueOptions, Error, Result, StepJournal, StepRecord, WorkflowHandle,
    WorkflowQueue, WorkflowStatus,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// One accepted enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWorkflow {
    pub options: EnqueueOptions,
    pub args: DispatchArgs,
}

#[derive(Default)]
struct QueueState {
    seen: HashSet<String>,
    pending: VecDeque<QueuedWorkflow>,
    history: Vec<QueuedWorkflow>,
    statuses: HashMap<String, WorkflowStatus>,
    enqueue_calls: u32,
    enqueue_failures: u32,
    status_failures: HashSet<String>,
}

/// Queue that deduplicates on `deduplication_id` like the durable substrate.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted enqueue, in order. Deduplicated calls are not listed.
    pub fn enqueued(&self) -> Vec<QueuedWorkflow> {
        self.state.lock().history.clone()
    }

    pub fn enqueued_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .history
            .iter()
            .map(|w| w.options.workflow_id.clone())
            .collect()
    }

    /// Total `enqueue` calls, deduplicated ones included.
    pub fn enqueue_calls(&self) -> u32 {
        self.state.lock().enqueue_calls
    }

    /// Takes every workflow not yet handed out.
    pub fn drain(&self) -> Vec<QueuedWorkflow> {
        self.state.lock().pending.drain(..).collect()
    }

    pub fn set_status(&self, workflow_id: impl Into<String>, status: WorkflowStatus) {
        self.state.lock().statuses.insert(workflow_id.into(), status);
    }

    pub fn fail_status_queries_for(&self, workflow_id: impl Into<String>) {
        self.state.lock().status_failures.insert(workflow_id.into());
    }

    pub fn fail_next_enqueues(&self, count: u32) {
        self.state.lock().enqueue_failures = count;
    }
}

#[async_trait]
impl WorkflowQueue for InMemoryQueue {
    async fn enqueue(&self, options: EnqueueOptions, args: DispatchArgs) -> Result<WorkflowHandle> {
        let mut state = self.state.lock();
        state.enqueue_calls += 1;
        if state.enqueue_failures > 0 {
            state.enqueue_failures -= 1;
            return Err(Error::substrate("queue unavailable"));
        }

        let handle = WorkflowHandle {
            workflow_id: options.workflow_id.clone(),
        };
        if state.seen.insert(options.deduplication_id.clone()) {
            state
                .statuses
                .insert(options.workflow_id.clone(), WorkflowStatus::Enqueued);
            let queued = QueuedWorkflow { options, args };
            state.pending.push_back(queued.clone());
            state.history.push(queued);
        }
        Ok(handle)
    }

    async fn get_workflow_status(&self, workflow_id: &str) -> Result<Option<WorkflowStatus>> {
        let state = self.state.lock();
        if state.status_failures.contains(workflow_id) {
            return Err(Error::substrate(format!(
                "status lookup failed for {workflow_id}"
            )));
        }
        Ok(state.statuses.get(workflow_id).copied())
    }
}

/// Step journal keyed by `(workflow_id, step_index)`.
#[derive(Default)]
pub struct InMemoryJournal {
    records: Mutex<HashMap<(String, u32), StepRecord>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Step names recorded for `workflow_id`, in step order.
    pub fn step_names(&self, workflow_id: &str) -> Vec<String> {
        let records = self.records.lock();
        let mut steps: Vec<&StepRecord> = records
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .collect();
        steps.sort_by_key(|r| r.step_index);
        steps.iter().map(|r| r.step_name.clone()).collect()
    }

    /// Drops journaled steps from `step_index` on, as if the workflow crashed there.
    pub fn truncate(&self, workflow_id: &str, step_index: u32) {
        self.records
            .lock()
            .retain(|(id, index), _| id != workflow_id || *index < step_index);
    }
}

#[async_trait]
impl StepJournal for InMemoryJournal {
    async fn load_step(&self, workflow_id: &str, step_index: u32) -> Result<Option<StepRecord>> {
        Ok(self
            .records
            .lock()
            .get(&(workflow_id.to_string(), step_index))
            .cloned())
    }

    async fn record_step(&self, record: StepRecord) -> Result<()> {
        self.records
            .lock()
            .insert((record.workflow_id.clone(), record.step_index), record);
        Ok(())
    }
}
