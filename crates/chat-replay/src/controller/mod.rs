//! Replay controller.
//!
//! Drives a [`ChatEventStore`] and a [`DanmakuScheduler`] from a playback
//! clock. The controller owns all mutable state and runs as a single tokio
//! task; source fetches run as child tasks whose results are merged back in
//! the loop, so no state is ever shared across tasks.
//!
//! Hosts talk to the task through a [`ReplayHandle`] and observe it by
//! subscribing to [`ReplayEvent`]s.

mod clock;
mod events;
mod measure;

pub use clock::{ManualClock, PlaybackClock, RealtimeClock};
pub use events::{ControllerState, ReplayCommand, ReplayEvent, ReplayFrame, TickerView};
pub use measure::{BulletMeasure, CharWidthMeasure};

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HistoryMode, ReplayConfig};
use crate::error::{ReplayError, Result};
use crate::scheduler::DanmakuScheduler;
use crate::source::ChatSource;
use crate::store::{ChatEventStore, Fetched};

/// Configuration constants for the controller loop.
mod config {
    /// Capacity of the event broadcast channel.
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
    /// Capacity of the command channel.
    pub const COMMAND_CHANNEL_CAPACITY: usize = 32;
    /// How far past the playback position forward fetches read.
    pub const PREFETCH_MS: i64 = 5_000;
}

/// Result of command handling - indicates whether to continue or stop.
#[derive(Debug, PartialEq)]
enum CommandResult {
    Continue,
    Stop,
}

#[derive(Debug)]
struct LoadRequest {
    anchor_id: String,
    count: usize,
}

/// Fetch tasks owned by the loop.
#[derive(Default)]
struct InFlight {
    reset: Option<JoinHandle<Fetched>>,
    forward: Option<JoinHandle<Fetched>>,
    backward: Option<JoinHandle<Fetched>>,
    /// Request served by `backward`
    loading: Option<LoadRequest>,
}

impl InFlight {
    fn abort_fetches(&mut self) {
        for task in [
            self.reset.take(),
            self.forward.take(),
            self.backward.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

/// Await a task slot; never resolves while the slot is empty.
async fn join<T>(task: &mut Option<JoinHandle<T>>) -> std::result::Result<T, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// State machine replaying one archived chat alongside its video.
pub struct ReplayController {
    config: ReplayConfig,
    source: Arc<dyn ChatSource>,
    clock: Arc<dyn PlaybackClock>,
    measure: Arc<dyn BulletMeasure>,

    store: ChatEventStore,
    scheduler: DanmakuScheduler,
    playing: bool,

    event_tx: broadcast::Sender<ReplayEvent>,
    state_tx: watch::Sender<ControllerState>,
}

impl ReplayController {
    pub fn new(
        config: ReplayConfig,
        source: Arc<dyn ChatSource>,
        clock: Arc<dyn PlaybackClock>,
        measure: Arc<dyn BulletMeasure>,
    ) -> Result<Self> {
        let store = ChatEventStore::from_config(&config)?;
        let mut scheduler =
            DanmakuScheduler::new(config.danmaku, f64::from(config.danmaku.viewport_width));
        let (event_tx, _) = broadcast::channel(config::EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ControllerState::Idle);
        let playing = !clock.is_paused();
        if !playing {
            scheduler.pause();
        }
        Ok(Self {
            config,
            source,
            clock,
            measure,
            store,
            scheduler,
            playing,
            event_tx,
            state_tx,
        })
    }

    /// Subscribe to controller events. Subscribe before [`Self::spawn`] to
    /// receive the first frame.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplayEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    /// Start the controller on the current tokio runtime.
    pub fn spawn(self) -> ReplayHandle {
        let (command_tx, command_rx) = mpsc::channel(config::COMMAND_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();
        let event_tx = self.event_tx.clone();
        let state_rx = self.state_tx.subscribe();
        let task = tokio::spawn(self.run(command_rx, cancel_token.clone()));
        ReplayHandle {
            command_tx,
            event_tx,
            state_rx,
            cancel_token,
            task,
        }
    }

    /// Run the replay loop until stopped or cancelled.
    pub async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<ReplayCommand>,
        cancel_token: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut tasks = InFlight::default();
        let start = self.clock.current_time_ms();
        info!("Starting chat replay at {}ms", start);
        let fetch = self.store.plan_reset(start);
        tasks.reset = Some(self.spawn_fetch(|source| async move { fetch.run(&*source).await }));

        loop {
            tokio::select! {
                biased;

                // Handle commands (highest priority)
                cmd = command_rx.recv() => {
                    if self.handle_command(cmd, &mut tasks) == CommandResult::Stop {
                        break;
                    }
                }

                _ = cancel_token.cancelled() => {
                    debug!("Replay cancelled");
                    break;
                }

                result = join(&mut tasks.reset) => {
                    tasks.reset = None;
                    self.on_reset(result);
                }

                result = join(&mut tasks.forward) => {
                    tasks.forward = None;
                    self.on_forward(result);
                }

                result = join(&mut tasks.backward) => {
                    tasks.backward = None;
                    self.on_backward(result, &mut tasks);
                }

                _ = interval.tick() => {
                    self.on_tick(&mut tasks);
                }
            }
            self.settle(&tasks);
        }

        tasks.abort_fetches();
        self.state_tx.send_replace(ControllerState::Idle);
        let _ = self.event_tx.send(ReplayEvent::Stopped);
        info!("Chat replay stopped");
    }

    fn handle_command(&mut self, cmd: Option<ReplayCommand>, tasks: &mut InFlight) -> CommandResult {
        match cmd {
            Some(ReplayCommand::Play) => {
                self.playing = true;
                self.scheduler.resume();
                self.render();
            }
            Some(ReplayCommand::Pause) => {
                self.playing = false;
                self.scheduler.pause();
                self.render();
            }
            Some(ReplayCommand::Seek(time_ms)) => self.seek(time_ms, tasks),
            Some(ReplayCommand::Resize(width)) => {
                let now = self.clock.current_time_ms();
                self.scheduler.resize(f64::from(width), now);
                self.render();
            }
            Some(ReplayCommand::LoadEarlier { anchor_id, count }) => {
                self.load_earlier(LoadRequest { anchor_id, count }, tasks);
            }
            Some(ReplayCommand::Stop) | None => return CommandResult::Stop,
        }
        CommandResult::Continue
    }

    fn spawn_fetch<F, Fut>(&self, run: F) -> JoinHandle<Fetched>
    where
        F: FnOnce(Arc<dyn ChatSource>) -> Fut,
        Fut: Future<Output = Fetched> + Send + 'static,
    {
        tokio::spawn(run(Arc::clone(&self.source)))
    }

    fn seek(&mut self, time_ms: i64, tasks: &mut InFlight) {
        tasks.abort_fetches();
        // The store is about to forget every anchor
        if let Some(request) = tasks.loading.take() {
            self.answer_empty(request);
        }

        let evicted = self.scheduler.seek();
        debug!("Seek to {}ms evicted {} bullets", time_ms, evicted.len());
        let fetch = self.store.plan_reset(time_ms);
        tasks.reset = Some(self.spawn_fetch(|source| async move { fetch.run(&*source).await }));
    }

    fn on_tick(&mut self, tasks: &mut InFlight) {
        if let Some(time_ms) = self.store.pending_reset() {
            // A failed anchor fetch is retried until it lands
            if tasks.reset.is_none() {
                debug!("Retrying reset around {}ms", time_ms);
                let fetch = self.store.retry_reset(time_ms);
                tasks.reset =
                    Some(self.spawn_fetch(|source| async move { fetch.run(&*source).await }));
            }
            return;
        }
        if !self.playing {
            return;
        }

        let now = self.clock.current_time_ms();
        if tasks.forward.is_none()
            && let Some(fetch) = self.store.plan_forward(now + config::PREFETCH_MS)
        {
            debug!("Fetching forward to {}ms", fetch.target_ms());
            tasks.forward =
                Some(self.spawn_fetch(|source| async move { fetch.run(&*source).await }));
        }
        self.render();
    }

    fn on_reset(&mut self, result: std::result::Result<Fetched, JoinError>) {
        match result {
            Ok(fetched) => match self.store.apply_reset(fetched) {
                Ok(added) => {
                    debug!("Reset loaded {} events", added);
                    self.render();
                }
                Err(e) => self.fault(e),
            },
            Err(e) => self.fault(ReplayError::source(format!("Reset task failed: {e}"))),
        }
    }

    fn on_forward(&mut self, result: std::result::Result<Fetched, JoinError>) {
        match result {
            Ok(fetched) => match self.store.apply_forward(fetched) {
                Ok(added) => debug!("Forward fetch added {} events", added),
                Err(e) => self.fault(e),
            },
            Err(e) => self.fault(ReplayError::source(format!("Forward task failed: {e}"))),
        }
    }

    fn on_backward(&mut self, result: std::result::Result<Fetched, JoinError>, tasks: &mut InFlight) {
        match result {
            Ok(fetched) => {
                if let Err(e) = self.store.apply_backward(fetched) {
                    self.fault(e);
                }
            }
            Err(e) => self.fault(ReplayError::source(format!("Backward task failed: {e}"))),
        }
        if let Some(request) = tasks.loading.take() {
            self.answer_load(request);
        }
    }

    /// Answer a load request, fetching first when the store is short of
    /// history. A newer request replaces one still in flight.
    fn load_earlier(&mut self, request: LoadRequest, tasks: &mut InFlight) {
        if let Some(task) = tasks.backward.take() {
            task.abort();
        }
        if let Some(previous) = tasks.loading.take() {
            debug!("Load before {} superseded", previous.anchor_id);
            self.answer_empty(previous);
        }

        let Some(anchor_offset) = self
            .store
            .message(&request.anchor_id)
            .map(|anchor| anchor.offset_ms())
        else {
            self.fault(ReplayError::UnknownAnchor(request.anchor_id));
            return;
        };
        match self
            .store
            .plan_backward(anchor_offset, request.count, &request.anchor_id)
        {
            Ok(Some(fetch)) => {
                debug!("Loading {} messages before {}", request.count, request.anchor_id);
                tasks.backward =
                    Some(self.spawn_fetch(|source| async move { fetch.run(&*source).await }));
                tasks.loading = Some(request);
            }
            Ok(None) => self.answer_load(request),
            Err(e) => self.fault(e),
        }
    }

    fn answer_load(&self, request: LoadRequest) {
        match self.store.messages_preceding(&request.anchor_id, request.count) {
            Ok(messages) => {
                let _ = self.event_tx.send(ReplayEvent::EarlierMessages {
                    anchor_id: request.anchor_id,
                    messages: messages.to_vec(),
                });
            }
            Err(e) => self.fault(e),
        }
    }

    fn answer_empty(&self, request: LoadRequest) {
        let _ = self.event_tx.send(ReplayEvent::EarlierMessages {
            anchor_id: request.anchor_id,
            messages: Vec::new(),
        });
    }

    fn fault(&self, error: ReplayError) {
        let halted = self.store.is_halted();
        warn!("Replay fault: {}", error);
        let _ = self.event_tx.send(ReplayEvent::Fault {
            error: error.to_string(),
            halted,
        });
    }

    /// Build and emit the frame for the current playback position.
    fn render(&mut self) {
        self.state_tx.send_replace(ControllerState::Rendering);
        let now = self.clock.current_time_ms();

        self.scheduler.collect_garbage(now);
        for event in self
            .store
            .messages_in_window(now, self.config.danmaku.duration_ms)
        {
            if self.scheduler.contains(event.id()) {
                continue;
            }
            let width = self.measure.width(event);
            if let Err(e) = self
                .scheduler
                .add(event.id(), event.offset_ms(), width, now)
            {
                debug!("Skipping bullet: {}", e);
            }
        }

        let messages = match self.config.history {
            HistoryMode::Count(count) => self.store.messages_before(now, count),
            HistoryMode::Window(window_ms) => self.store.messages_in_window(now, window_ms),
        };
        let frame = ReplayFrame {
            time_ms: now,
            playing: self.playing,
            messages: messages.to_vec(),
            tickers: self
                .store
                .active_tickers(now)
                .into_iter()
                .map(|ticker| TickerView::new(ticker, now))
                .collect(),
            banner: self.store.active_banner(now).cloned(),
            bullets: self.scheduler.placements(now),
        };
        let _ = self.event_tx.send(ReplayEvent::Frame(frame));
    }

    fn settle(&self, tasks: &InFlight) {
        let state = if tasks.forward.is_some() || tasks.reset.is_some() {
            ControllerState::Fetching
        } else {
            ControllerState::Idle
        };
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

/// Handle to a running [`ReplayController`].
pub struct ReplayHandle {
    command_tx: mpsc::Sender<ReplayCommand>,
    event_tx: broadcast::Sender<ReplayEvent>,
    state_rx: watch::Receiver<ControllerState>,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl ReplayHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ReplayEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        *self.state_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn send(&self, command: ReplayCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ReplayError::Stopped)
    }

    pub async fn play(&self) -> Result<()> {
        self.send(ReplayCommand::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(ReplayCommand::Pause).await
    }

    pub async fn seek(&self, time_ms: i64) -> Result<()> {
        self.send(ReplayCommand::Seek(time_ms)).await
    }

    pub async fn resize(&self, viewport_width: u32) -> Result<()> {
        self.send(ReplayCommand::Resize(viewport_width)).await
    }

    pub async fn load_earlier(&self, anchor_id: impl Into<String>, count: usize) -> Result<()> {
        self.send(ReplayCommand::LoadEarlier {
            anchor_id: anchor_id.into(),
            count,
        })
        .await
    }

    /// Cancel the controller without waiting for it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Stop the controller and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.command_tx.send(ReplayCommand::Stop).await;
        if let Err(e) = self.task.await {
            warn!("Replay task ended abnormally: {}", e);
        }
    }
}
