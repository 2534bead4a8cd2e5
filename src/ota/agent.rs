//! Update state machine
//!
//! The agent runs on its own task and consumes [`OtaEvent`]s from a bounded
//! queue. Inbound job documents and blocks reach the queue from registry
//! callbacks, which copy the payload into a pooled buffer; connection
//! lifecycle changes arrive as `Suspend`/`Resume`. A handler may return a
//! follow-up event, which is processed before the next queued one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::block::{Block, BlockRequest};
use super::image::{CreateOutcome, ImageState, ImageWriter};
use super::job::JobDocument;
use super::progress::{BlockCheck, TransferProgress};
use super::status::{JobStatus, StatusReport};
use super::topics::OtaTopics;
use crate::buffers::{BufferPool, PooledBuffer};
use crate::config::{OtaSettings, SubscribeFailurePolicy};
use crate::connection::ConnectionEvent;
use crate::registry::{Incoming, IncomingCallback};
use crate::session::{Ack, CommandClient, Completion, Subscription};
use crate::transport::QoS;
use crate::utils::error::{CommandError, OtaError};

#[derive(Debug)]
pub enum OtaEvent {
    Start,
    RequestJobDocument,
    ReceivedJobDocument(PooledBuffer),
    CreateFile,
    RequestFileBlock,
    ReceivedFileBlock(PooledBuffer),
    RequestTimer,
    CloseFile,
    Suspend,
    Resume,
    SubscribeFailed(String),
    UserAbort,
    Shutdown,
}

impl OtaEvent {
    fn name(&self) -> &'static str {
        match self {
            OtaEvent::Start => "start",
            OtaEvent::RequestJobDocument => "request_job_document",
            OtaEvent::ReceivedJobDocument(_) => "received_job_document",
            OtaEvent::CreateFile => "create_file",
            OtaEvent::RequestFileBlock => "request_file_block",
            OtaEvent::ReceivedFileBlock(_) => "received_file_block",
            OtaEvent::RequestTimer => "request_timer",
            OtaEvent::CloseFile => "close_file",
            OtaEvent::Suspend => "suspend",
            OtaEvent::Resume => "resume",
            OtaEvent::SubscribeFailed(_) => "subscribe_failed",
            OtaEvent::UserAbort => "user_abort",
            OtaEvent::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    RequestingJob,
    CreatingFile,
    RequestingBlock,
    ClosingFile,
    ActivatingImage,
    Stopped,
    Suspended,
    Resumed,
}

/// Snapshot of the packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OtaStatistics {
    pub packets_received: u64,
    pub packets_queued: u64,
    pub packets_processed: u64,
    pub packets_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    queued: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OtaStatistics {
        OtaStatistics {
            packets_received: self.received.load(Ordering::Relaxed),
            packets_queued: self.queued.load(Ordering::Relaxed),
            packets_processed: self.processed.load(Ordering::Relaxed),
            packets_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable handle for posting events and observing the agent.
#[derive(Clone, Debug)]
pub struct OtaHandle {
    events: mpsc::Sender<OtaEvent>,
    state: watch::Receiver<OtaState>,
    counters: Arc<Counters>,
}

impl OtaHandle {
    pub async fn send(&self, event: OtaEvent) -> Result<(), OtaError> {
        self.events
            .send(event)
            .await
            .map_err(|_| OtaError::Command(CommandError::ChannelClosed))
    }

    pub fn state(&self) -> OtaState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<OtaState> {
        self.state.clone()
    }

    pub fn statistics(&self) -> OtaStatistics {
        self.counters.snapshot()
    }
}

/// Deferred work armed by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    RequestRetry,
    SelfTestCooldown,
}

pub struct OtaAgent<W: ImageWriter> {
    client: CommandClient,
    writer: W,
    topics: OtaTopics,
    settings: OtaSettings,
    pool: BufferPool,
    events_tx: mpsc::Sender<OtaEvent>,
    events_rx: mpsc::Receiver<OtaEvent>,
    state: OtaState,
    suspended_from: OtaState,
    state_tx: watch::Sender<OtaState>,
    job: Option<JobDocument>,
    last_job_id: Option<String>,
    progress: Option<TransferProgress>,
    timer: Option<(Instant, Timer)>,
    momentum: u32,
    counters: Arc<Counters>,
    subscribed: Arc<AtomicBool>,
}

impl<W: ImageWriter> OtaAgent<W> {
    /// The agent starts suspended; `Start` or the first `Resume` brings it
    /// up.
    pub fn new(client: CommandClient, writer: W, pool: BufferPool, settings: OtaSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.event_queue_len.max(1));
        let (state_tx, _) = watch::channel(OtaState::Suspended);
        Self {
            client,
            writer,
            topics: OtaTopics::new(&settings.thing_name),
            settings,
            pool,
            events_tx,
            events_rx,
            state: OtaState::Suspended,
            suspended_from: OtaState::RequestingJob,
            state_tx,
            job: None,
            last_job_id: None,
            progress: None,
            timer: None,
            momentum: 0,
            counters: Arc::new(Counters::default()),
            subscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> OtaHandle {
        OtaHandle {
            events: self.events_tx.clone(),
            state: self.state_tx.subscribe(),
            counters: self.counters.clone(),
        }
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn progress(&self) -> Option<&TransferProgress> {
        self.progress.as_ref()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Process events until `Shutdown` or until the machine stops.
    /// Returns the image writer.
    pub async fn run(mut self) -> W {
        info!("OTA agent started for {}", self.settings.thing_name);
        loop {
            let event = match self.timer {
                Some((deadline, timer)) => tokio::select! {
                    event = self.events_rx.recv() => event,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.timer = None;
                        Some(match timer {
                            Timer::RequestRetry => OtaEvent::RequestTimer,
                            Timer::SelfTestCooldown => OtaEvent::RequestJobDocument,
                        })
                    }
                },
                None => self.events_rx.recv().await,
            };

            let Some(event) = event else { break };
            let shutdown = matches!(event, OtaEvent::Shutdown);
            self.dispatch(event).await;
            if shutdown || self.state == OtaState::Stopped {
                break;
            }
        }
        info!("OTA agent stopped in {:?}", self.state);
        self.writer
    }

    /// Handle `event` and every follow-up it produces.
    pub async fn dispatch(&mut self, event: OtaEvent) {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            debug!("OTA event {} in {:?}", event.name(), self.state);
            next = self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: OtaEvent) -> Option<OtaEvent> {
        if self.state == OtaState::Stopped {
            debug!("OTA agent stopped, ignoring {}", event.name());
            return None;
        }

        if self.state == OtaState::Suspended {
            match event {
                OtaEvent::Start | OtaEvent::Resume => return self.resume().await,
                OtaEvent::ReceivedJobDocument(buffer) | OtaEvent::ReceivedFileBlock(buffer) => {
                    self.discard(buffer, "agent suspended");
                    return None;
                }
                OtaEvent::UserAbort => return self.user_abort().await,
                OtaEvent::Shutdown => {
                    self.set_state(OtaState::Stopped);
                    return None;
                }
                OtaEvent::SubscribeFailed(reason) => return self.subscribe_failed(reason),
                other => {
                    debug!("Suspended, deferring {}", other.name());
                    return None;
                }
            }
        }

        match event {
            OtaEvent::Start | OtaEvent::Resume => {
                debug!("Already running");
                None
            }
            OtaEvent::Suspend => {
                self.suspend();
                None
            }
            OtaEvent::RequestJobDocument => {
                self.request_job().await;
                None
            }
            OtaEvent::ReceivedJobDocument(buffer) => self.on_job_document(buffer).await,
            OtaEvent::CreateFile => self.create_file().await,
            OtaEvent::RequestFileBlock => self.request_blocks().await,
            OtaEvent::ReceivedFileBlock(buffer) => self.on_block(buffer).await,
            OtaEvent::RequestTimer => self.on_request_timeout().await,
            OtaEvent::CloseFile => self.close_file().await,
            OtaEvent::SubscribeFailed(reason) => self.subscribe_failed(reason),
            OtaEvent::UserAbort => self.user_abort().await,
            OtaEvent::Shutdown => {
                self.set_state(OtaState::Stopped);
                None
            }
        }
    }

    fn set_state(&mut self, state: OtaState) {
        if self.state != state {
            debug!("OTA state {:?} -> {state:?}", self.state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn suspend(&mut self) {
        info!("Connection lost, suspending OTA in {:?}", self.state);
        self.suspended_from = self.state;
        self.timer = None;
        self.set_state(OtaState::Suspended);
    }

    /// Leave `Suspended` and re-issue whatever request was outstanding.
    async fn resume(&mut self) -> Option<OtaEvent> {
        self.set_state(OtaState::Resumed);
        if !self.subscribed.load(Ordering::Acquire) {
            self.subscribe_topics().await;
        }

        let target = self.suspended_from;
        info!("Resuming OTA in {target:?}");
        self.set_state(target);
        match target {
            OtaState::RequestingJob => Some(OtaEvent::RequestJobDocument),
            OtaState::CreatingFile => Some(OtaEvent::CreateFile),
            OtaState::RequestingBlock => Some(OtaEvent::RequestFileBlock),
            OtaState::ClosingFile => Some(OtaEvent::CloseFile),
            _ => None,
        }
    }

    async fn subscribe_topics(&mut self) {
        let job_callback = self.forwarder(OtaEvent::ReceivedJobDocument);
        let block_callback = self.forwarder(OtaEvent::ReceivedFileBlock);
        let subscriptions = vec![
            Subscription {
                filter: self.topics.job_notify_next(),
                qos: QoS::AtLeastOnce,
                callback: job_callback.clone(),
            },
            Subscription {
                filter: self.topics.job_get_accepted(),
                qos: QoS::AtLeastOnce,
                callback: job_callback,
            },
            Subscription {
                filter: self.topics.stream_data_filter(),
                qos: QoS::AtMostOnce,
                callback: block_callback,
            },
        ];

        let filters: Vec<String> = subscriptions.iter().map(|s| s.filter.clone()).collect();
        let subscribed = self.subscribed.clone();
        let events = self.events_tx.clone();
        let completion: Completion = Box::new(move |outcome| match outcome {
            Ok(Ack::Subscribed { granted }) => {
                let rejected: Vec<&str> = filters
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !granted.get(*i).copied().unwrap_or(false))
                    .map(|(_, filter)| filter.as_str())
                    .collect();
                if rejected.is_empty() {
                    subscribed.store(true, Ordering::Release);
                } else {
                    let reason = format!("rejected by broker: {}", rejected.join(", "));
                    let _ = events.try_send(OtaEvent::SubscribeFailed(reason));
                }
            }
            Ok(other) => warn!("Unexpected subscribe outcome {other:?}"),
            Err(CommandError::Disconnected | CommandError::ChannelClosed) => {
                debug!("OTA subscribe interrupted, will retry on resume");
            }
            Err(e) => {
                let _ = events.try_send(OtaEvent::SubscribeFailed(e.to_string()));
            }
        });
        if let Err(e) = self.client.subscribe_detached(subscriptions, completion).await {
            warn!("OTA subscribe not queued: {e}");
        }
    }

    /// Callback that copies an inbound publish into a pooled buffer and
    /// queues it. Drops the message when no buffer or queue slot is free.
    fn forwarder(&self, wrap: fn(PooledBuffer) -> OtaEvent) -> IncomingCallback {
        let pool = self.pool.clone();
        let events = self.events_tx.clone();
        let counters = self.counters.clone();
        Arc::new(move |msg: Incoming<'_>| {
            Counters::bump(&counters.received);
            let Some(mut buffer) = pool.acquire() else {
                Counters::bump(&counters.dropped);
                warn!("No free buffer, dropping publish on {}", msg.topic);
                return;
            };
            if let Err(e) = buffer.fill(msg.topic, msg.payload) {
                Counters::bump(&counters.dropped);
                warn!("Dropping publish on {}: {e}", msg.topic);
                return;
            }
            match events.try_send(wrap(buffer)) {
                Ok(()) => Counters::bump(&counters.queued),
                Err(e) => {
                    Counters::bump(&counters.dropped);
                    warn!("OTA event queue unavailable, dropping {}", e.into_inner().name());
                }
            }
        })
    }

    fn discard(&self, buffer: PooledBuffer, reason: &str) {
        debug!("Discarding publish on {}: {reason}", buffer.topic());
        Counters::bump(&self.counters.dropped);
        buffer.release();
    }

    async fn request_job(&mut self) {
        self.set_state(OtaState::RequestingJob);
        let request = json!({ "clientToken": uuid::Uuid::new_v4().to_string() });
        let payload = request.to_string().into_bytes();
        let topic = self.topics.job_get();
        if let Err(e) = self
            .client
            .publish_detached(&topic, payload, QoS::AtLeastOnce, log_failure("job request"))
            .await
        {
            warn!("Job request not queued: {e}");
        }
    }

    async fn on_job_document(&mut self, buffer: PooledBuffer) -> Option<OtaEvent> {
        let parsed = JobDocument::parse(buffer.data());
        Counters::bump(&self.counters.processed);
        buffer.release();

        let document = match parsed {
            Ok(Some(document)) => document,
            Ok(None) => {
                info!("No pending OTA job");
                return None;
            }
            Err(e) => {
                warn!("Ignoring job document: {e}");
                return None;
            }
        };

        if self.last_job_id.as_deref() == Some(document.job_id.as_str()) {
            debug!("Job {} already handled", document.job_id);
            self.activation_check(&document).await;
            return None;
        }

        if self.state != OtaState::RequestingJob {
            warn!(
                "Ignoring job {} while {:?}",
                document.job_id, self.state
            );
            return None;
        }

        info!(
            "Accepted job {} ({} bytes, stream {})",
            document.job_id, document.file_size, document.stream_name
        );
        self.last_job_id = Some(document.job_id.clone());
        self.progress = Some(TransferProgress::new(document.file_size, self.settings.block_size));
        self.job = Some(document);
        self.momentum = 0;
        Some(OtaEvent::CreateFile)
    }

    /// A re-notified job whose image is booted and pending acceptance is
    /// accepted; anything else is left alone.
    async fn activation_check(&mut self, document: &JobDocument) {
        if document.self_test && self.writer.image_state() == ImageState::Testing {
            self.accept_image(&document.job_id).await;
        }
    }

    async fn accept_image(&mut self, job_id: &str) {
        match self.writer.set_image_state(ImageState::Accepted) {
            Ok(()) => {
                info!("Image for job {job_id} accepted");
                self.report(job_id, StatusReport::new(JobStatus::Succeeded).with("reason", "accepted"))
                    .await;
            }
            Err(e) => {
                error!("Could not accept image for job {job_id}: {e}");
                self.report(job_id, StatusReport::new(JobStatus::Failed).with("reason", e.to_string()))
                    .await;
            }
        }
    }

    async fn create_file(&mut self) -> Option<OtaEvent> {
        self.set_state(OtaState::CreatingFile);
        let job = self.job.clone()?;

        match self.writer.create_file(&job) {
            CreateOutcome::Created => Some(OtaEvent::RequestFileBlock),
            CreateOutcome::PendingSelfTest => {
                self.accept_image(&job.job_id).await;
                self.job = None;
                self.progress = None;
                self.set_state(OtaState::RequestingJob);
                self.timer = Some((
                    Instant::now() + self.settings.selftest_cooldown(),
                    Timer::SelfTestCooldown,
                ));
                None
            }
            CreateOutcome::Failed(reason) => {
                error!("Could not create image file for job {}: {reason}", job.job_id);
                self.report(&job.job_id, StatusReport::new(JobStatus::Failed).with("reason", reason))
                    .await;
                self.forget_job();
                self.set_state(OtaState::RequestingJob);
                None
            }
        }
    }

    async fn request_blocks(&mut self) -> Option<OtaEvent> {
        self.set_state(OtaState::RequestingBlock);
        let job = self.job.as_ref()?;
        let progress = self.progress.as_mut()?;
        if progress.is_complete() {
            return Some(OtaEvent::CloseFile);
        }

        let (offset, count) = progress.open_window(self.settings.blocks_per_request);
        let request = BlockRequest::new(job.file_id, self.settings.block_size, offset, count);
        let topic = self.topics.stream_get(&job.stream_name);
        self.timer = Some((
            Instant::now() + self.settings.request_timeout(),
            Timer::RequestRetry,
        ));

        let payload = match request.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Block request could not be encoded: {e}");
                return None;
            }
        };
        debug!("Requesting blocks {offset}..{} of {}", offset + count, job.stream_name);
        if let Err(e) = self
            .client
            .publish_detached(&topic, payload, QoS::AtMostOnce, log_failure("block request"))
            .await
        {
            warn!("Block request not queued: {e}");
        }
        None
    }

    async fn on_block(&mut self, buffer: PooledBuffer) -> Option<OtaEvent> {
        if self.state != OtaState::RequestingBlock {
            self.discard(buffer, "no transfer in progress");
            return None;
        }
        let decoded = Block::decode(buffer.data());
        buffer.release();

        let block = match decoded {
            Ok(block) => block,
            Err(e) => {
                warn!("Discarding block: {e}");
                Counters::bump(&self.counters.dropped);
                return None;
            }
        };
        let (job, progress) = match (self.job.as_ref(), self.progress.as_mut()) {
            (Some(job), Some(progress)) => (job, progress),
            _ => return None,
        };

        if block.file_id != job.file_id {
            debug!("Discarding block for file {} (expected {})", block.file_id, job.file_id);
            Counters::bump(&self.counters.dropped);
            return None;
        }
        if block.len() > self.settings.max_block_size {
            warn!(
                "Discarding block {} of {} bytes, above maximum {}",
                block.block_id,
                block.len(),
                self.settings.max_block_size
            );
            Counters::bump(&self.counters.dropped);
            return None;
        }
        match progress.check(block.block_id, block.len()) {
            BlockCheck::Accept => {}
            BlockCheck::Stale => {
                debug!("Discarding stale block {}", block.block_id);
                Counters::bump(&self.counters.dropped);
                return None;
            }
            BlockCheck::OutOfOrder => {
                debug!(
                    "Discarding block {}, expecting {}",
                    block.block_id, progress.next_block
                );
                Counters::bump(&self.counters.dropped);
                return None;
            }
            BlockCheck::BadLength { expected } => {
                warn!(
                    "Discarding block {} of {} bytes, expected {expected}",
                    block.block_id,
                    block.len()
                );
                Counters::bump(&self.counters.dropped);
                return None;
            }
        }

        let offset = progress.offset(block.block_id);
        if let Err(e) = self.writer.write_block(offset, &block.payload) {
            error!("Writing block {} failed: {e}", block.block_id);
            return self.abandon_job(&format!("write failed: {e}")).await;
        }
        progress.record(block.block_id, block.len());
        Counters::bump(&self.counters.processed);
        self.momentum = 0;

        let received = progress.blocks_received();
        let report_due = self.settings.status_report_interval > 0
            && received % self.settings.status_report_interval == 0
            && !progress.is_complete();
        let summary = progress.received();
        let next = if progress.is_complete() {
            self.timer = None;
            Some(OtaEvent::CloseFile)
        } else if progress.window_consumed() {
            Some(OtaEvent::RequestFileBlock)
        } else {
            self.timer = Some((
                Instant::now() + self.settings.request_timeout(),
                Timer::RequestRetry,
            ));
            None
        };

        if report_due {
            let job_id = job.job_id.clone();
            self.report(
                &job_id,
                StatusReport::new(JobStatus::InProgress).with("received", summary),
            )
            .await;
        }
        next
    }

    async fn on_request_timeout(&mut self) -> Option<OtaEvent> {
        if self.state != OtaState::RequestingBlock {
            return None;
        }
        self.momentum += 1;
        if self.momentum > self.settings.max_request_momentum {
            error!("No block progress after {} requests", self.momentum);
            return self.abandon_job("request momentum exceeded").await;
        }
        warn!(
            "Block request timed out ({}/{}), requesting again",
            self.momentum, self.settings.max_request_momentum
        );
        Some(OtaEvent::RequestFileBlock)
    }

    async fn close_file(&mut self) -> Option<OtaEvent> {
        self.set_state(OtaState::ClosingFile);
        let job = self.job.clone()?;

        if let Err(e) = self.writer.close_file(&job) {
            error!("Image for job {} rejected: {e}", job.job_id);
            if let Err(abort) = self.writer.abort(&job) {
                error!("Erasing image for job {} failed: {abort}", job.job_id);
            }
            self.report(&job.job_id, StatusReport::new(JobStatus::Failed).with("reason", e.to_string()))
                .await;
            self.forget_job();
            return Some(OtaEvent::RequestJobDocument);
        }

        self.set_state(OtaState::ActivatingImage);
        let ready = StatusReport::new(JobStatus::InProgress).with("self_test", "ready");
        match ready.encode() {
            Ok(payload) => {
                // Waits for the broker so the report is out before the reset.
                let topic = self.topics.job_update(&job.job_id);
                if let Err(e) = self.client.publish(&topic, payload, QoS::AtLeastOnce).await {
                    warn!("Self-test status for job {} not confirmed: {e}", job.job_id);
                }
            }
            Err(e) => error!("Status report could not be encoded: {e}"),
        }

        if let Err(e) = self.writer.activate(&job) {
            error!("Activating image for job {} failed: {e}", job.job_id);
            self.report(&job.job_id, StatusReport::new(JobStatus::Failed).with("reason", e.to_string()))
                .await;
        }
        self.set_state(OtaState::Stopped);
        None
    }

    fn subscribe_failed(&mut self, reason: String) -> Option<OtaEvent> {
        match self.settings.subscribe_failure_policy {
            SubscribeFailurePolicy::Abort => {
                error!("OTA subscribe failed, stopping: {reason}");
                self.set_state(OtaState::Stopped);
            }
            SubscribeFailurePolicy::Drop => warn!("OTA subscribe failed: {reason}"),
        }
        None
    }

    async fn user_abort(&mut self) -> Option<OtaEvent> {
        if self.job.is_none() {
            debug!("No job to abort");
            return None;
        }
        info!("OTA job aborted by user");
        let next = self.abandon_job("user abort").await;
        if self.state == OtaState::Suspended {
            self.suspended_from = OtaState::RequestingJob;
        }
        next.filter(|_| self.state != OtaState::Suspended)
    }

    /// Erase the partial image, report `FAILED` and wait for the next job.
    async fn abandon_job(&mut self, reason: &str) -> Option<OtaEvent> {
        self.timer = None;
        let job = self.job.take()?;
        if let Err(e) = self.writer.abort(&job) {
            error!("Erasing image for job {} failed: {e}", job.job_id);
        }
        self.report(&job.job_id, StatusReport::new(JobStatus::Failed).with("reason", reason))
            .await;
        self.forget_job();
        if self.state != OtaState::Suspended {
            self.set_state(OtaState::RequestingJob);
        }
        Some(OtaEvent::RequestJobDocument)
    }

    fn forget_job(&mut self) {
        self.job = None;
        self.progress = None;
        self.last_job_id = None;
        self.timer = None;
        self.momentum = 0;
    }

    async fn report(&mut self, job_id: &str, report: StatusReport) {
        let payload = match report.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Status report could not be encoded: {e}");
                return;
            }
        };
        debug!("Reporting {:?} for job {job_id}", report.status);
        let topic = self.topics.job_update(job_id);
        if let Err(e) = self
            .client
            .publish_detached(&topic, payload, QoS::AtLeastOnce, log_failure("status report"))
            .await
        {
            warn!("Status report for job {job_id} not queued: {e}");
        }
    }
}

fn log_failure(what: &'static str) -> Completion {
    Box::new(move |outcome| {
        if let Err(e) = outcome {
            warn!("OTA {what} failed: {e}");
        }
    })
}

/// Forward connection lifecycle events to the OTA agent as
/// `Resume`/`Suspend`.
pub fn spawn_connectivity_listener(
    mut events: broadcast::Receiver<ConnectionEvent>,
    ota: OtaHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {missed} connection events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let forwarded = match event {
                ConnectionEvent::Connected { .. } => OtaEvent::Resume,
                ConnectionEvent::Disconnected { .. } => OtaEvent::Suspend,
            };
            if ota.send(forwarded).await.is_err() {
                break;
            }
        }
    })
}
