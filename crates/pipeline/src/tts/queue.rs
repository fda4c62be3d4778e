//! TTS streaming queue
//!
//! Turns a stream of sentences into back-to-back spoken output with
//! bounded gaps. A single cooperative worker owns playback (strictly in
//! ordinal order); synthesis runs ahead of playback under a small
//! concurrency cap. The EWMA predictor decides how early each synthesis
//! starts so audio is ready when the previous sentence ends.
//!
//! The queue mutex is held only while enqueuing, dequeuing, or updating
//! job bookkeeping, never across a suspension point.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use voice_router_config::QueueConfig;
use voice_router_core::{AudioChunk, CancellationToken, SynthesisBackend};

use super::predictor::EwmaPredictor;
use super::splitter::Sentence;
use crate::PipelineError;

/// Synthesis/playback priority; affects synthesis order only, never
/// playback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Job lifecycle: Queued → Synthesizing → Ready → Playing → Done, with
/// Cancelled/Failed edges from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Synthesizing,
    Ready,
    Playing,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Cancelled | JobState::Failed)
    }
}

/// One synthesis job
#[derive(Debug, Clone)]
pub struct TtsJob {
    pub id: Uuid,
    pub ordinal: u64,
    pub text: String,
    pub priority: Priority,
    pub speed: f32,
    pub submitted_at: Instant,
    pub state: JobState,
    pub estimated_duration: Duration,
    finished_at: Option<Instant>,
    cancel: CancellationToken,
}

/// Events published by the queue worker
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Audio for one sentence is starting playback
    AudioChunk {
        ordinal: u64,
        job_id: Uuid,
        bytes: Arc<[u8]>,
        duration: Duration,
    },
    /// A sentence finished playing; `gap_ms` is the silence before it
    SentenceComplete {
        ordinal: u64,
        job_id: Uuid,
        gap_ms: Option<u64>,
    },
    /// Synthesis failed after retries; the sentence is skipped
    Underrun {
        ordinal: u64,
        job_id: Uuid,
        error: String,
    },
    /// Everything enqueued so far has finished
    Drained,
}

/// Read-only queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub ewma_mean_seconds: f64,
    pub ewma_confidence: f64,
    pub enqueued: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub avg_gap_ms: f64,
    pub max_gap_ms: u64,
    pub depth: usize,
}

/// Heap entry: higher priority pops first, FIFO within a priority
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    priority: Priority,
    seq: u64,
    id: Uuid,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<HeapEntry>,
    jobs: HashMap<Uuid, TtsJob>,
    by_ordinal: HashMap<u64, Uuid>,
    next_ordinal: u64,
    next_seq: u64,
    playing: Option<u64>,
    active: usize,
    enqueued: u64,
    completed: u64,
    cancelled: u64,
    failed: u64,
    gap_total_ms: u128,
    gap_count: u64,
    gap_max_ms: u64,
}

struct SynthOutcome {
    ordinal: u64,
    job_id: Uuid,
    result: Result<AudioChunk, String>,
    synth_seconds: f64,
    was_cancelled: bool,
}

/// Priority queue scheduling synthesis and playback with gap control
pub struct TtsQueue {
    config: QueueConfig,
    synthesizer: Arc<dyn SynthesisBackend>,
    predictor: Arc<EwmaPredictor>,
    inner: Mutex<Inner>,
    work_notify: Arc<Notify>,
    capacity_notify: Arc<Notify>,
    event_tx: broadcast::Sender<QueueEvent>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    /// Replaced on every start so a cancelled stop does not poison restarts
    hard_stop: Mutex<CancellationToken>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TtsQueue {
    pub fn new(config: QueueConfig, synthesizer: Arc<dyn SynthesisBackend>) -> Arc<Self> {
        let predictor = Arc::new(EwmaPredictor::new(
            config.ewma_alpha,
            config.ewma_target_samples,
        ));
        let (event_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            config,
            synthesizer,
            predictor,
            inner: Mutex::new(Inner::default()),
            work_notify: Arc::new(Notify::new()),
            capacity_notify: Arc::new(Notify::new()),
            event_tx,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            hard_stop: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        })
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Shared latency predictor
    pub fn predictor(&self) -> Arc<EwmaPredictor> {
        self.predictor.clone()
    }

    /// Current run's hard-stop token
    fn hard_stop(&self) -> CancellationToken {
        self.hard_stop.lock().clone()
    }

    /// Start the worker; idempotent
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        *self.hard_stop.lock() = CancellationToken::new();
        let queue = Arc::clone(self);
        *self.worker.lock() = Some(tokio::spawn(async move {
            queue.run_worker().await;
        }));
        tracing::debug!("TTS queue started");
    }

    /// Stop the worker; idempotent. With `cancel` false pending jobs are
    /// drained first; with `cancel` true everything unfinished is
    /// cancelled immediately.
    pub async fn stop(&self, cancel: bool) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        if cancel {
            self.cancel_all_after(0, true);
            self.hard_stop().cancel();
        }
        self.work_notify.notify_one();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::debug!(cancel, "TTS queue stopped");
    }

    /// Enqueue raw text as one sentence
    pub fn enqueue(
        &self,
        text: &str,
        priority: Priority,
        speed: f32,
    ) -> Result<Uuid, PipelineError> {
        let estimate = Duration::from_secs_f32(
            (text.chars().count() as f32 / 15.0).max(0.5),
        );
        self.enqueue_job(text, estimate, priority, speed)
    }

    /// Enqueue a split sentence, keeping its duration estimate
    pub fn enqueue_sentence(
        &self,
        sentence: &Sentence,
        priority: Priority,
        speed: f32,
    ) -> Result<Uuid, PipelineError> {
        self.enqueue_job(
            &sentence.text,
            sentence.estimated_duration(),
            priority,
            speed,
        )
    }

    fn enqueue_job(
        &self,
        text: &str,
        estimated_duration: Duration,
        priority: Priority,
        speed: f32,
    ) -> Result<Uuid, PipelineError> {
        if !(0.5..=2.0).contains(&speed) {
            return Err(PipelineError::InvalidSpeed(speed));
        }
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyText);
        }

        let id = Uuid::new_v4();
        {
            let mut inner = self.inner.lock();
            self.prune_retained(&mut inner);

            if inner.active >= self.config.capacity {
                return Err(PipelineError::QueueFull);
            }
            // Above 90% fullness new work spills to Low priority.
            let spill = inner.active * 10 >= self.config.capacity * 9;
            let effective_priority = if spill { Priority::Low } else { priority };
            if spill && priority != Priority::Low {
                tracing::debug!(depth = inner.active, "Queue near capacity, spilling to Low");
            }

            let ordinal = inner.next_ordinal;
            inner.next_ordinal += 1;
            let seq = inner.next_seq;
            inner.next_seq += 1;

            inner.jobs.insert(
                id,
                TtsJob {
                    id,
                    ordinal,
                    text: text.to_string(),
                    priority: effective_priority,
                    speed,
                    submitted_at: Instant::now(),
                    state: JobState::Queued,
                    estimated_duration,
                    finished_at: None,
                    cancel: CancellationToken::new(),
                },
            );
            inner.by_ordinal.insert(ordinal, id);
            inner.heap.push(HeapEntry {
                priority: effective_priority,
                seq,
                id,
            });
            inner.active += 1;
            inner.enqueued += 1;
        }
        self.work_notify.notify_one();
        Ok(id)
    }

    /// Enqueue, waiting for capacity if the queue is full. This is how
    /// the generator pauses when the queue saturates.
    pub async fn enqueue_sentence_wait(
        &self,
        sentence: &Sentence,
        priority: Priority,
        speed: f32,
    ) -> Result<Uuid, PipelineError> {
        loop {
            match self.enqueue_sentence(sentence, priority, speed) {
                Err(PipelineError::QueueFull) => {
                    let notified = self.capacity_notify.notified();
                    if self.hard_stop().is_cancelled() {
                        return Err(PipelineError::Stopped);
                    }
                    notified.await;
                }
                other => return other,
            }
        }
    }

    /// Cancel one job by id; returns the number of jobs cancelled (0 or 1)
    pub fn cancel(&self, id: Uuid) -> usize {
        let mut inner = self.inner.lock();
        let cancelled = match inner.jobs.get_mut(&id) {
            Some(job) if !job.state.is_terminal() => {
                job.state = JobState::Cancelled;
                job.finished_at = Some(Instant::now());
                job.cancel.cancel();
                true
            }
            _ => false,
        };
        if cancelled {
            inner.cancelled += 1;
            inner.active = inner.active.saturating_sub(1);
            drop(inner);
            self.capacity_notify.notify_waiters();
            self.work_notify.notify_one();
            1
        } else {
            0
        }
    }

    /// Cancel every unfinished job with ordinal strictly greater than
    /// `after` (inclusive of `after` when `inclusive` is set). Returns the
    /// cancelled count.
    pub fn cancel_all_after(&self, after: u64, inclusive: bool) -> usize {
        let mut count = 0;
        {
            let mut inner = self.inner.lock();
            for job in inner.jobs.values_mut() {
                let hit = job.ordinal > after || (inclusive && job.ordinal == after);
                if hit && !job.state.is_terminal() {
                    job.state = JobState::Cancelled;
                    job.finished_at = Some(Instant::now());
                    job.cancel.cancel();
                    count += 1;
                }
            }
            inner.cancelled += count as u64;
            inner.active = inner.active.saturating_sub(count);
        }
        if count > 0 {
            self.capacity_notify.notify_waiters();
            self.work_notify.notify_one();
        }
        count
    }

    /// Cancel everything after the currently playing sentence
    pub fn cancel_after_current(&self) -> usize {
        let current = self.inner.lock().playing;
        match current {
            Some(ordinal) => self.cancel_all_after(ordinal, false),
            // Nothing playing yet: cancel everything still pending.
            None => self.cancel_all_after(0, true),
        }
    }

    /// Ordinal currently being played, if any
    pub fn current_ordinal(&self) -> Option<u64> {
        self.inner.lock().playing
    }

    /// Snapshot of a job's public state
    pub fn job(&self, id: Uuid) -> Option<TtsJob> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    pub fn stats(&self) -> QueueStats {
        let ewma = self.predictor.snapshot();
        let inner = self.inner.lock();
        QueueStats {
            ewma_mean_seconds: ewma.mean_seconds,
            ewma_confidence: ewma.confidence,
            enqueued: inner.enqueued,
            completed: inner.completed,
            cancelled: inner.cancelled,
            failed: inner.failed,
            avg_gap_ms: if inner.gap_count == 0 {
                0.0
            } else {
                inner.gap_total_ms as f64 / inner.gap_count as f64
            },
            max_gap_ms: inner.gap_max_ms,
            depth: inner.active,
        }
    }

    fn prune_retained(&self, inner: &mut Inner) {
        let retention = Duration::from_secs(self.config.retention_s);
        let now = Instant::now();
        let stale: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| {
                j.state.is_terminal()
                    && j.finished_at
                        .map(|t| now.duration_since(t) >= retention)
                        .unwrap_or(false)
            })
            .map(|j| j.id)
            .collect();
        for id in stale {
            if let Some(job) = inner.jobs.remove(&id) {
                inner.by_ordinal.remove(&job.ordinal);
            }
        }
    }

    // =========================================================================
    // Worker
    // =========================================================================

    async fn run_worker(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_synthesis));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SynthOutcome>();
        let hard_stop = self.hard_stop();

        // Ordinal → synthesized audio (None = skipped: failed or cancelled).
        let mut ready: BTreeMap<u64, Option<AudioChunk>> = BTreeMap::new();
        let mut next_play: u64 = 0;
        let mut prev_play_end: Option<Instant> = None;
        let mut prev_audio_len: Option<Duration> = None;
        // Estimated end of the playback timeline, used to schedule synthesis.
        let mut est_timeline_end: Option<Instant> = None;
        let mut was_busy = false;

        let gap_target = Duration::from_millis(self.config.gap_target_ms);
        let margin = Duration::from_millis(self.config.overlap_margin_ms);

        loop {
            // 1. Dispatch synthesis while permits and queued jobs exist.
            while semaphore.available_permits() > 0 {
                let Some(job) = self.pop_for_synthesis() else {
                    break;
                };
                was_busy = true;

                let (p_n, confidence) = self.predictor.predict();
                let lead = Duration::from_secs_f64(p_n)
                    .min(prev_audio_len.unwrap_or(Duration::from_secs_f64(p_n)));
                let slack = gap_target + margin.mul_f64(1.0 - confidence);
                let now = Instant::now();
                let start_at = match est_timeline_end {
                    Some(end) => {
                        let target = end + slack;
                        target.checked_sub(lead).unwrap_or(now).max(now)
                    }
                    None => now,
                };

                // Optimistic timeline estimate for scheduling the next job.
                let est_ready = start_at + Duration::from_secs_f64(p_n);
                let est_start = match est_timeline_end {
                    Some(end) => est_ready.max(end + gap_target),
                    None => est_ready,
                };
                est_timeline_end = Some(est_start + job.estimated_duration);
                prev_audio_len = Some(job.estimated_duration);

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => break,
                };
                self.spawn_synthesis(job, start_at, permit, done_tx.clone());
            }

            // 2. Collect finished synthesis without blocking.
            while let Ok(outcome) = done_rx.try_recv() {
                self.handle_outcome(outcome, &mut ready);
            }

            // 3. Skip over ordinals cancelled before dispatch.
            while self.is_cancelled_ordinal(next_play) && !ready.contains_key(&next_play) {
                next_play += 1;
            }

            // 4. Play the next ordinal when its audio is available.
            if let Some(slot) = ready.remove(&next_play) {
                let ordinal = next_play;
                next_play += 1;
                if let Some(chunk) = slot {
                    let played = self
                        .play(
                            ordinal,
                            chunk,
                            gap_target,
                            &mut prev_play_end,
                            &mut prev_audio_len,
                        )
                        .await;
                    if let Some(actual_end) = played {
                        est_timeline_end =
                            Some(est_timeline_end.map_or(actual_end, |e| e.max(actual_end)));
                    }
                }
                continue;
            }

            // 5. Idle / drained bookkeeping and exit conditions.
            let idle = {
                let inner = self.inner.lock();
                inner.active == 0
            };
            if idle && ready.is_empty() {
                if was_busy {
                    was_busy = false;
                    let _ = self.event_tx.send(QueueEvent::Drained);
                }
                if self.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
            } else if self.stop_requested.load(Ordering::SeqCst) && hard_stop.is_cancelled() {
                break;
            }

            // 6. Wait for new work, a synthesis completion, or shutdown.
            tokio::select! {
                outcome = done_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_outcome(outcome, &mut ready);
                    }
                }
                _ = self.work_notify.notified() => {}
                _ = hard_stop.cancelled() => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }

    /// Pop the highest-priority queued job; stale heap entries (cancelled
    /// or re-prioritized jobs) are discarded on the way.
    fn pop_for_synthesis(&self) -> Option<TtsJob> {
        let mut inner = self.inner.lock();
        loop {
            let entry = inner.heap.pop()?;
            if let Some(job) = inner.jobs.get_mut(&entry.id) {
                if job.state == JobState::Queued {
                    job.state = JobState::Synthesizing;
                    return Some(job.clone());
                }
            }
        }
    }

    fn is_cancelled_ordinal(&self, ordinal: u64) -> bool {
        let inner = self.inner.lock();
        inner
            .by_ordinal
            .get(&ordinal)
            .and_then(|id| inner.jobs.get(id))
            .map(|job| job.state == JobState::Cancelled)
            .unwrap_or(false)
    }

    fn spawn_synthesis(
        &self,
        job: TtsJob,
        start_at: Instant,
        permit: tokio::sync::OwnedSemaphorePermit,
        done_tx: mpsc::UnboundedSender<SynthOutcome>,
    ) {
        let synthesizer = self.synthesizer.clone();
        let timeout = Duration::from_millis(self.config.synthesis_timeout_ms);
        let job_cancel = job.cancel.clone();
        let hard_stop = self.hard_stop();

        tokio::spawn(async move {
            let _permit = permit;

            tokio::select! {
                _ = tokio::time::sleep_until(start_at) => {}
                _ = job_cancel.cancelled() => {}
                _ = hard_stop.cancelled() => {}
            }
            if job_cancel.is_cancelled() || hard_stop.is_cancelled() {
                let _ = done_tx.send(SynthOutcome {
                    ordinal: job.ordinal,
                    job_id: job.id,
                    result: Err("cancelled".to_string()),
                    synth_seconds: 0.0,
                    was_cancelled: true,
                });
                return;
            }

            let began = Instant::now();
            let mut last_error = String::new();

            // Two retries with jittered backoff: 25 ms, then 100 ms.
            for (attempt, backoff_ms) in [0u64, 25, 100].iter().enumerate() {
                if *backoff_ms > 0 {
                    let jitter = rand::thread_rng().gen_range(0.0..0.5);
                    tokio::time::sleep(Duration::from_millis(*backoff_ms).mul_f64(1.0 + jitter))
                        .await;
                }
                if job_cancel.is_cancelled() || hard_stop.is_cancelled() {
                    let _ = done_tx.send(SynthOutcome {
                        ordinal: job.ordinal,
                        job_id: job.id,
                        result: Err("cancelled".to_string()),
                        synth_seconds: began.elapsed().as_secs_f64(),
                        was_cancelled: true,
                    });
                    return;
                }

                let attempt_result = tokio::select! {
                    r = tokio::time::timeout(
                        timeout,
                        synthesizer.synthesize(&job.text, job.speed),
                    ) => r,
                    _ = job_cancel.cancelled() => {
                        let _ = done_tx.send(SynthOutcome {
                            ordinal: job.ordinal,
                            job_id: job.id,
                            result: Err("cancelled".to_string()),
                            synth_seconds: began.elapsed().as_secs_f64(),
                            was_cancelled: true,
                        });
                        return;
                    }
                };

                match attempt_result {
                    Ok(Ok(chunk)) => {
                        let _ = done_tx.send(SynthOutcome {
                            ordinal: job.ordinal,
                            job_id: job.id,
                            result: Ok(chunk),
                            synth_seconds: began.elapsed().as_secs_f64(),
                            was_cancelled: false,
                        });
                        return;
                    }
                    Ok(Err(e)) => {
                        last_error = e.to_string();
                        tracing::warn!(
                            ordinal = job.ordinal,
                            attempt,
                            error = %last_error,
                            "Synthesis attempt failed"
                        );
                    }
                    Err(_) => {
                        last_error = "synthesis timeout".to_string();
                        tracing::warn!(ordinal = job.ordinal, attempt, "Synthesis timed out");
                    }
                }
            }

            let _ = done_tx.send(SynthOutcome {
                ordinal: job.ordinal,
                job_id: job.id,
                result: Err(last_error),
                synth_seconds: began.elapsed().as_secs_f64(),
                was_cancelled: false,
            });
        });
    }

    fn handle_outcome(&self, outcome: SynthOutcome, ready: &mut BTreeMap<u64, Option<AudioChunk>>) {
        let mut inner = self.inner.lock();
        let state = inner.jobs.get(&outcome.job_id).map(|j| j.state);

        match (&outcome.result, outcome.was_cancelled) {
            (_, true) => {
                // Already counted by cancel(); just make sure playback skips it.
                ready.insert(outcome.ordinal, None);
            }
            (Ok(chunk), false) => {
                if state == Some(JobState::Cancelled) {
                    ready.insert(outcome.ordinal, None);
                } else {
                    if let Some(job) = inner.jobs.get_mut(&outcome.job_id) {
                        job.state = JobState::Ready;
                    }
                    drop(inner);
                    self.predictor.record(outcome.synth_seconds);
                    ready.insert(outcome.ordinal, Some(chunk.clone()));
                    return;
                }
            }
            (Err(error), false) => {
                let mut failed = false;
                if let Some(job) = inner.jobs.get_mut(&outcome.job_id) {
                    if job.state != JobState::Cancelled {
                        job.state = JobState::Failed;
                        job.finished_at = Some(Instant::now());
                        failed = true;
                    }
                }
                if failed {
                    inner.failed += 1;
                    inner.active = inner.active.saturating_sub(1);
                }
                drop(inner);
                self.capacity_notify.notify_waiters();
                let _ = self.event_tx.send(QueueEvent::Underrun {
                    ordinal: outcome.ordinal,
                    job_id: outcome.job_id,
                    error: error.clone(),
                });
                ready.insert(outcome.ordinal, None);
                return;
            }
        }
    }

    /// Play one sentence: wait out the gap target, emit the audio chunk,
    /// then hold the worker for the audio duration. Returns the actual
    /// playback end time, or `None` if the job was skipped.
    async fn play(
        &self,
        ordinal: u64,
        chunk: AudioChunk,
        gap_target: Duration,
        prev_play_end: &mut Option<Instant>,
        prev_audio_len: &mut Option<Duration>,
    ) -> Option<Instant> {
        let (job_id, job_cancel) = {
            let mut inner = self.inner.lock();
            let id = *inner.by_ordinal.get(&ordinal)?;
            let cancel = {
                let job = inner.jobs.get_mut(&id)?;
                if job.state == JobState::Cancelled {
                    return None;
                }
                job.state = JobState::Playing;
                job.cancel.clone()
            };
            inner.playing = Some(ordinal);
            (id, cancel)
        };

        let hard_stop = self.hard_stop();

        // Audio synthesized early is buffered and released at end + G.
        if let Some(prev_end) = *prev_play_end {
            let release_at = prev_end + gap_target;
            let now = Instant::now();
            if now < release_at {
                tokio::select! {
                    _ = tokio::time::sleep_until(release_at) => {}
                    _ = hard_stop.cancelled() => return None,
                }
            }
        }

        if job_cancel.is_cancelled() || hard_stop.is_cancelled() {
            return None;
        }

        let start = Instant::now();
        let gap_ms = prev_play_end.map(|end| {
            start
                .checked_duration_since(end)
                .unwrap_or(Duration::ZERO)
                .as_millis() as u64
        });

        if let Some(gap) = gap_ms {
            let mut inner = self.inner.lock();
            inner.gap_total_ms += u128::from(gap);
            inner.gap_count += 1;
            inner.gap_max_ms = inner.gap_max_ms.max(gap);
            if gap > self.config.gap_target_ms + 20 {
                tracing::debug!(ordinal, gap_ms = gap, "Inter-sentence gap above target");
            }
        }

        let _ = self.event_tx.send(QueueEvent::AudioChunk {
            ordinal,
            job_id,
            bytes: chunk.bytes.clone(),
            duration: chunk.duration,
        });

        tokio::select! {
            _ = tokio::time::sleep(chunk.duration) => {}
            _ = hard_stop.cancelled() => return None,
        }

        let end = Instant::now();
        {
            let mut inner = self.inner.lock();
            let mut finished = false;
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                if job.state == JobState::Playing {
                    job.state = JobState::Done;
                    job.finished_at = Some(end);
                    finished = true;
                }
            }
            if finished {
                inner.completed += 1;
                inner.active = inner.active.saturating_sub(1);
            }
            inner.playing = None;
        }
        self.capacity_notify.notify_waiters();

        let _ = self.event_tx.send(QueueEvent::SentenceComplete {
            ordinal,
            job_id,
            gap_ms,
        });

        *prev_play_end = Some(end);
        *prev_audio_len = Some(chunk.duration);
        Some(end)
    }
}
