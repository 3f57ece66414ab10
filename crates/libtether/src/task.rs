use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::error::{Result, TetherError};

/// Severity of a completed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The task completed as intended.
    Ok,
    /// The task completed with a condition worth surfacing.
    Warning,
    /// The task failed.
    Error,
}

/// Result value returned by every [`Task`].
///
/// A status can carry an optional signal code (e.g. "already up to date") and,
/// for errors, the underlying cause.
#[derive(Debug)]
pub struct TaskStatus {
    /// Outcome severity.
    severity: Severity,
    /// Optional signal code distinguishing non-error outcomes.
    code: Option<i32>,
    /// Optional human-readable message.
    message: Option<String>,
    /// Underlying error for [`Severity::Error`] statuses.
    cause: Option<TetherError>,
}

impl TaskStatus {
    /// A plain successful status.
    pub fn ok() -> Self {
        Self {
            severity: Severity::Ok,
            code: None,
            message: None,
            cause: None,
        }
    }

    /// A successful status carrying a signal code.
    pub fn ok_with_code(code: i32) -> Self {
        Self {
            severity: Severity::Ok,
            code: Some(code),
            message: None,
            cause: None,
        }
    }

    /// A warning status with a message.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: None,
            message: Some(message.into()),
            cause: None,
        }
    }

    /// An error status carrying its cause.
    pub fn from_error(cause: TetherError) -> Self {
        Self {
            severity: Severity::Error,
            code: None,
            message: Some(cause.to_string()),
            cause: Some(cause),
        }
    }

    /// Outcome severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Whether the task completed successfully.
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Whether the task failed.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Signal code, when one was reported.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Human-readable message, when one was reported.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Underlying error for error statuses.
    pub fn cause(&self) -> Option<&TetherError> {
        self.cause.as_ref()
    }

    /// Convert into a `Result`, yielding the signal code on success and the
    /// underlying cause on error. Warnings convert to success.
    pub fn into_result(self) -> Result<Option<i32>> {
        match self.severity {
            Severity::Error => Err(self
                .cause
                .unwrap_or_else(|| TetherError::Validation("task failed without a cause".to_string()))),
            _ => Ok(self.code),
        }
    }
}

/// A unit of work executed against a progress reporter.
///
/// Every orchestration step implements this one contract; composition happens
/// through [`TaskExecutor`], not through inheritance.
pub trait Task {
    /// Short human-readable name used in progress labels.
    fn name(&self) -> String;

    /// Execute the task. Expected failures are reported as error statuses,
    /// never panics; cleanup obligations must hold on every exit path.
    fn run(&mut self, progress: &Progress) -> TaskStatus;
}

/// Cooperative cancellation flag shared across a progress tree.
///
/// Cancellation is observed at loop boundaries, never preemptively.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Shared flag visible to all holders of the token.
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every descendant progress node.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Rendering backend for a progress tree.
///
/// Implementations must tolerate events for nodes they have already ended.
pub trait ProgressSink: Send + Sync {
    /// A task node began. `parent` is the id of the enclosing node, if any.
    fn begun(&self, id: u64, parent: Option<u64>, label: &str, total: Option<u64>);
    /// A node's total unit count changed.
    fn total_changed(&self, id: u64, total: u64);
    /// A node advanced by `units`.
    fn advanced(&self, id: u64, units: u64);
    /// A node's detail line changed; `None` clears it.
    fn detail_changed(&self, id: u64, detail: Option<&str>);
    /// A node ended. Delivered exactly once per begun node.
    fn ended(&self, id: u64);
    /// An informational message outside the tree structure.
    fn message(&self, msg: &str);
    /// A warning message outside the tree structure.
    fn warning(&self, msg: &str);
}

/// Sink that discards everything. Useful for tests and quiet runs.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn begun(&self, _id: u64, _parent: Option<u64>, _label: &str, _total: Option<u64>) {}
    fn total_changed(&self, _id: u64, _total: u64) {}
    fn advanced(&self, _id: u64, _units: u64) {}
    fn detail_changed(&self, _id: u64, _detail: Option<&str>) {}
    fn ended(&self, _id: u64) {}
    fn message(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
}

/// State shared by every node of one progress tree.
struct Shared {
    /// Rendering backend.
    sink: Arc<dyn ProgressSink>,
    /// Cancellation flag for the whole tree.
    cancel: CancellationToken,
    /// Id allocator for subtask nodes.
    next_id: AtomicU64,
}

/// A node in a hierarchical progress tree.
///
/// Completing a subtask advances its parent by the units allotted at
/// creation. A node that was begun but never explicitly ended ends itself on
/// drop, so the tree stays consistent on every exit path.
pub struct Progress {
    /// Tree-wide shared state.
    shared: Arc<Shared>,
    /// This node's id.
    id: u64,
    /// Enclosing node id, if any.
    parent: Option<u64>,
    /// Units of the parent this node advances on completion.
    allotted: u64,
    /// Whether `begin` has been called.
    begun: AtomicBool,
    /// Whether the node has ended.
    ended: AtomicBool,
}

impl Progress {
    /// Create the root node of a new progress tree.
    pub fn new(sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                cancel,
                next_id: AtomicU64::new(1),
            }),
            id: 0,
            parent: None,
            allotted: 0,
            begun: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    /// Open this node with a label and an optional total unit count
    /// (`None` renders as indeterminate).
    pub fn begin(&self, label: &str, total: Option<u64>) {
        if self.begun.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.sink.begun(self.id, self.parent, label, total);
    }

    /// Replace the total unit count of this node.
    pub fn set_total(&self, total: u64) {
        self.shared.sink.total_changed(self.id, total);
    }

    /// Advance this node by `units`.
    pub fn advance(&self, units: u64) {
        self.shared.sink.advanced(self.id, units);
    }

    /// Set or clear the detail line shown under this node's label.
    pub fn set_detail(&self, detail: Option<&str>) {
        self.shared.sink.detail_changed(self.id, detail);
    }

    /// Create a child node whose completion advances this node by `units`.
    pub fn subtask(&self, units: u64) -> Self {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(&self.shared),
            id,
            parent: Some(self.id),
            allotted: units,
            begun: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    /// Emit an informational message.
    pub fn message(&self, msg: &str) {
        self.shared.sink.message(msg);
    }

    /// Emit a warning message.
    pub fn warn(&self, msg: &str) {
        self.shared.sink.warning(msg);
    }

    /// Whether cancellation has been requested for this tree.
    pub fn cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// End this node, advancing the parent by the allotted units.
    /// Idempotent; the sink sees at most one `ended` per node.
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.begun.load(Ordering::SeqCst) {
            self.shared.sink.ended(self.id);
        }
        if let Some(parent) = self.parent {
            self.shared.sink.advanced(parent, self.allotted);
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.end();
    }
}

/// Runs tasks and composes their statuses.
///
/// A sequence stops at the first non-OK status; warnings terminate the
/// sequence too unless the executor is configured to tolerate them.
#[derive(Debug, Default)]
pub struct TaskExecutor {
    /// Whether WARNING-level statuses allow a sequence to continue.
    tolerate_warnings: bool,
}

impl TaskExecutor {
    /// Create an executor that stops at the first non-OK status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow WARNING-level statuses to continue a sequence.
    pub fn tolerate_warnings(mut self) -> Self {
        self.tolerate_warnings = true;
        self
    }

    /// Run a single task under the given progress node, ending the node on
    /// every exit path. A pending cancellation fails the task before it runs.
    pub fn execute(&self, task: &mut dyn Task, progress: Progress) -> TaskStatus {
        if progress.cancelled() {
            progress.end();
            return TaskStatus::from_error(TetherError::Cancelled);
        }
        let status = task.run(&progress);
        progress.end();
        status
    }

    /// Run tasks back-to-back as subtasks of `parent`, stopping at the first
    /// status the executor does not tolerate and returning it unchanged.
    pub fn execute_all(&self, tasks: &mut [&mut dyn Task], parent: &Progress) -> TaskStatus {
        for task in tasks.iter_mut() {
            let status = self.execute(&mut **task, parent.subtask(1));
            match status.severity() {
                Severity::Ok => {}
                Severity::Warning if self.tolerate_warnings => {}
                _ => return status,
            }
        }
        TaskStatus::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Sink that records every event for assertions.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl ProgressSink for RecordingSink {
        fn begun(&self, id: u64, parent: Option<u64>, label: &str, _total: Option<u64>) {
            self.push(format!("begin {id} parent={parent:?} {label}"));
        }
        fn total_changed(&self, id: u64, total: u64) {
            self.push(format!("total {id} {total}"));
        }
        fn advanced(&self, id: u64, units: u64) {
            self.push(format!("advance {id} {units}"));
        }
        fn detail_changed(&self, id: u64, detail: Option<&str>) {
            self.push(format!("detail {id} {detail:?}"));
        }
        fn ended(&self, id: u64) {
            self.push(format!("end {id}"));
        }
        fn message(&self, msg: &str) {
            self.push(format!("message {msg}"));
        }
        fn warning(&self, msg: &str) {
            self.push(format!("warning {msg}"));
        }
    }

    /// Task returning a fixed status, counting invocations.
    struct FixedTask {
        status: Option<TaskStatus>,
        runs: usize,
    }

    impl FixedTask {
        fn new(status: TaskStatus) -> Self {
            Self {
                status: Some(status),
                runs: 0,
            }
        }
    }

    impl Task for FixedTask {
        fn name(&self) -> String {
            "fixed".to_string()
        }

        fn run(&mut self, _progress: &Progress) -> TaskStatus {
            self.runs += 1;
            self.status.take().unwrap_or_else(TaskStatus::ok)
        }
    }

    #[test]
    fn status_constructors_carry_fields() {
        let ok = TaskStatus::ok_with_code(1);
        assert!(ok.is_ok());
        assert_eq!(ok.code(), Some(1));

        let warn = TaskStatus::warning("careful");
        assert_eq!(warn.severity(), Severity::Warning);
        assert_eq!(warn.message(), Some("careful"));

        let err = TaskStatus::from_error(TetherError::GatedCheckin);
        assert!(err.is_error());
        assert!(matches!(err.cause(), Some(TetherError::GatedCheckin)));
        assert!(err.into_result().is_err());
    }

    #[test]
    fn subtask_completion_advances_parent_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let root = Progress::new(sink.clone(), CancellationToken::new());
        root.begin("root", Some(2));

        let child = root.subtask(2);
        child.begin("child", None);
        child.end();
        child.end();

        let events = sink.events();
        assert_eq!(
            events,
            vec![
                "begin 0 parent=None root".to_string(),
                "begin 1 parent=Some(0) child".to_string(),
                "end 1".to_string(),
                "advance 0 2".to_string(),
            ]
        );
    }

    #[test]
    fn dropped_subtask_still_ends() {
        let sink = Arc::new(RecordingSink::default());
        let root = Progress::new(sink.clone(), CancellationToken::new());
        root.begin("root", Some(1));

        {
            let child = root.subtask(1);
            child.begin("child", None);
            // dropped without end()
        }

        let events = sink.events();
        assert!(events.contains(&"end 1".to_string()));
        assert!(events.contains(&"advance 0 1".to_string()));
    }

    #[test]
    fn executor_stops_at_first_error() {
        let sink = Arc::new(RecordingSink::default());
        let root = Progress::new(sink, CancellationToken::new());
        root.begin("root", None);

        let mut first = FixedTask::new(TaskStatus::ok());
        let mut failing = FixedTask::new(TaskStatus::from_error(TetherError::Remote("down".into())));
        let mut never = FixedTask::new(TaskStatus::ok());

        let status = TaskExecutor::new().execute_all(
            &mut [&mut first, &mut failing, &mut never],
            &root,
        );

        assert!(status.is_error());
        assert_eq!(first.runs, 1);
        assert_eq!(failing.runs, 1);
        assert_eq!(never.runs, 0);
    }

    #[test]
    fn executor_stops_at_warning_unless_tolerated() {
        let sink = Arc::new(RecordingSink::default());
        let root = Progress::new(sink, CancellationToken::new());

        let mut warn = FixedTask::new(TaskStatus::warning("careful"));
        let mut after = FixedTask::new(TaskStatus::ok());
        let status = TaskExecutor::new().execute_all(&mut [&mut warn, &mut after], &root);
        assert_eq!(status.severity(), Severity::Warning);
        assert_eq!(after.runs, 0);

        let mut warn = FixedTask::new(TaskStatus::warning("careful"));
        let mut after = FixedTask::new(TaskStatus::ok());
        let status = TaskExecutor::new()
            .tolerate_warnings()
            .execute_all(&mut [&mut warn, &mut after], &root);
        assert!(status.is_ok());
        assert_eq!(after.runs, 1);
    }

    #[test]
    fn cancellation_fails_tasks_before_they_run() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let root = Progress::new(sink, cancel.clone());

        cancel.cancel();
        assert!(root.cancelled());

        let mut task = FixedTask::new(TaskStatus::ok());
        let status = TaskExecutor::new().execute(&mut task, root.subtask(1));
        assert!(matches!(status.cause(), Some(TetherError::Cancelled)));
        assert_eq!(task.runs, 0);
    }
}
