//! Run supervision: progress tracking, heartbeat, stuck detection, the
//! injection queue and abort.
//!
//! Scalars live in atomics so any task can read or bump them while the run
//! is in flight; the injection queue sits behind a small mutex.

use socmate_config::AgentConfig;
use socmate_core::provider::{LlmClient, Usage};
use socmate_core::tool::ToolRegistry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{AgentEvent, EventSink};

/// Queued when a stall is detected and `auto_status_check` is on.
pub const STATUS_CHECK_PROMPT: &str =
    "[System: No progress has been observed for a while. Briefly report what you are doing and what remains, then continue.]";

/// Shared state between the agent loop and its observers.
pub(crate) struct Supervisor {
    epoch: Instant,
    run_started_ms: AtomicU64,
    last_progress_ms: AtomicU64,
    iteration: AtomicU32,
    retry_count: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    running: AtomicBool,
    aborted: AtomicBool,
    cancel: Mutex<CancellationToken>,
    queue: Mutex<VecDeque<String>>,
    client: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
}

impl Supervisor {
    pub(crate) fn new(client: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            epoch: Instant::now(),
            run_started_ms: AtomicU64::new(0),
            last_progress_ms: AtomicU64::new(0),
            iteration: AtomicU32::new(0),
            retry_count: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            running: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            queue: Mutex::new(VecDeque::new()),
            client,
            tools,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Reset per-run state and hand out the run's cancellation token.
    pub(crate) fn begin_run(&self) -> CancellationToken {
        let now = self.now_ms();
        self.run_started_ms.store(now, Ordering::SeqCst);
        self.last_progress_ms.store(now, Ordering::SeqCst);
        self.iteration.store(0, Ordering::SeqCst);
        self.retry_count.store(0, Ordering::SeqCst);
        self.aborted.store(false, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        self.running.store(true, Ordering::SeqCst);
        token
    }

    pub(crate) fn end_run(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.retry_count.store(0, Ordering::SeqCst);
        self.aborted.store(false, Ordering::SeqCst);
    }

    /// Start a new iteration; returns its 1-based number.
    pub(crate) fn next_iteration(&self) -> u32 {
        self.retry_count.store(0, Ordering::SeqCst);
        self.mark_progress();
        self.iteration.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn iteration(&self) -> u32 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// Count one more retry of the current iteration; returns the attempt number.
    pub(crate) fn bump_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_retries(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_progress(&self) {
        self.last_progress_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub(crate) fn silent_for(&self) -> Duration {
        let last = self.last_progress_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub(crate) fn run_elapsed(&self) -> Duration {
        let started = self.run_started_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(started))
    }

    pub(crate) fn record_usage(&self, usage: Usage) {
        self.input_tokens.fetch_add(usage.prompt_tokens as u64, Ordering::SeqCst);
        self.output_tokens.fetch_add(usage.completion_tokens as u64, Ordering::SeqCst);
    }

    pub(crate) fn record_estimated_usage(&self, input: usize, output: usize) {
        self.input_tokens.fetch_add(input as u64, Ordering::SeqCst);
        self.output_tokens.fetch_add(output as u64, Ordering::SeqCst);
    }

    pub(crate) fn token_usage(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::SeqCst),
            self.output_tokens.load(Ordering::SeqCst),
        )
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Flag the run as aborted, cancel the in-flight stream and ask every
    /// tool to stop. Never blocks.
    pub(crate) fn abort(&self) {
        info!(iteration = self.iteration(), "Abort requested");
        self.aborted.store(true, Ordering::SeqCst);
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).cancel();
        self.client.cancel();
        self.tools.abort_all();
    }

    pub(crate) fn queue_request(&self, text: String) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(text);
        debug!(pending = queue.len(), "Queued user request");
    }

    /// Pop the oldest queued request with the number still waiting behind it.
    pub(crate) fn pop_request(&self) -> Option<(String, usize)> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front().map(|text| (text, queue.len()))
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.queue.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub(crate) fn pending_requests(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Run the heartbeat until `stop` is cancelled.
///
/// Every tick emits `Heartbeat` and `TokenUsage`; when stuck detection is on
/// and nothing happened for the configured window, emits `StuckDetected`,
/// optionally queues a status query, and restarts the window.
pub(crate) fn spawn_heartbeat(
    supervisor: Arc<Supervisor>,
    config: &AgentConfig,
    events: EventSink,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let period = Duration::from_secs(config.heartbeat_interval_seconds.max(1));
    let stuck_after = Duration::from_secs(config.stuck_threshold_seconds);
    let detect_stuck = config.enable_stuck_detection;
    let auto_status_check = config.auto_status_check;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }

            let iteration = supervisor.iteration();
            events.emit(AgentEvent::Heartbeat {
                iteration,
                elapsed_seconds: supervisor.run_elapsed().as_secs(),
            });
            let (input, output) = supervisor.token_usage();
            events.emit(AgentEvent::TokenUsage { input, output });

            if !detect_stuck {
                continue;
            }
            let silent = supervisor.silent_for();
            if silent >= stuck_after {
                warn!(iteration, silent_seconds = silent.as_secs(), "Agent appears stuck");
                events.emit(AgentEvent::StuckDetected {
                    iteration,
                    silent_seconds: silent.as_secs(),
                });
                if auto_status_check {
                    supervisor.queue_request(STATUS_CHECK_PROMPT.to_string());
                }
                supervisor.mark_progress();
            }
        }
    })
}

/// A cloneable handle for supervising an agent from another task.
///
/// Obtained with [`Agent::handle`](crate::Agent::handle). Every method is
/// non-blocking and safe to call whether or not a run is active.
#[derive(Clone)]
pub struct AgentHandle {
    pub(crate) supervisor: Arc<Supervisor>,
}

impl AgentHandle {
    /// Stop the current run at its next checkpoint.
    pub fn abort(&self) {
        self.supervisor.abort();
    }

    /// Queue a user message; it is injected at the next checkpoint, in FIFO order.
    pub fn queue_request(&self, text: impl Into<String>) {
        self.supervisor.queue_request(text.into());
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn current_iteration(&self) -> u32 {
        self.supervisor.iteration()
    }

    pub fn current_retry_count(&self) -> u32 {
        self.supervisor.retry_count()
    }

    /// Session totals: `(input, output)` tokens.
    pub fn token_usage(&self) -> (u64, u64) {
        self.supervisor.token_usage()
    }

    pub fn pending_requests(&self) -> usize {
        self.supervisor.pending_requests()
    }
}
