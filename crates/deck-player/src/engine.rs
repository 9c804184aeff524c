//! PlayerEngine: single-owner event loop for playback state.
//!
//! Everything that changes playback sends a `PlayerEvent` to this loop: user
//! commands, audio output events, media-key actions and the results of the
//! availability checks it spawns itself. The engine owns the queue, the
//! current track and the status exclusively and mirrors them into the
//! `StateManager`, announcing each change with `PlayerBroadcast::StateUpdated`.
//!
//! Playing a track is optimistic: the stream is loaded straight away while a
//! probe checks that the daemon has it cached. A failed probe keeps the track
//! in `Loading`, asks the daemon to acquire it and replays it once that
//! succeeds. Every spawned check is tagged with the generation of the play
//! request that started it; results for an older generation are dropped, as
//! are output events carrying an older ticket.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use deck_proto::track::Track;

use crate::media::{MediaAction, MediaControls, MediaSession};
use crate::output::{AudioOutput, OutputEvent};
use crate::queue::Queue;
use crate::source::{SourceError, TrackSource};
use crate::state::{PlaybackStatus, PlayerBroadcast, StateManager};

#[derive(Debug, Clone)]
pub enum Command {
    PlayTrack(Track),
    TogglePlayPause,
    PlayNext,
    PlayPrevious,
    /// Absolute position, seconds.
    Seek(f64),
    SetQueue(Vec<Track>),
    Stop,
}

/// All inputs into the engine loop.
#[derive(Debug)]
pub enum PlayerEvent {
    Command(Command),
    Output(OutputEvent),
    Media {
        generation: u64,
        action: MediaAction,
    },
    ProbeFinished {
        generation: u64,
        track_id: String,
        result: Result<(), SourceError>,
    },
    AcquireFinished {
        generation: u64,
        track_id: String,
        result: Result<(), SourceError>,
    },
    Shutdown,
}

/// Cloneable command surface for the front-end.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerEvent>,
}

impl PlayerHandle {
    pub fn new(tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self { tx }
    }

    async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.tx
            .send(PlayerEvent::Command(command))
            .await
            .map_err(|_| anyhow::anyhow!("player engine stopped"))
    }

    pub async fn play_track(&self, track: Track) -> anyhow::Result<()> {
        self.send(Command::PlayTrack(track)).await
    }

    pub async fn toggle_play_pause(&self) -> anyhow::Result<()> {
        self.send(Command::TogglePlayPause).await
    }

    pub async fn play_next(&self) -> anyhow::Result<()> {
        self.send(Command::PlayNext).await
    }

    pub async fn play_previous(&self) -> anyhow::Result<()> {
        self.send(Command::PlayPrevious).await
    }

    pub async fn seek(&self, position: f64) -> anyhow::Result<()> {
        self.send(Command::Seek(position)).await
    }

    pub async fn set_queue(&self, tracks: Vec<Track>) -> anyhow::Result<()> {
        self.send(Command::SetQueue(tracks)).await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PlayerEvent::Shutdown).await;
    }
}

pub struct PlayerEngine {
    source: Arc<dyn TrackSource>,
    output: Arc<dyn AudioOutput>,
    media: MediaControls,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<PlayerBroadcast>,
    event_tx: mpsc::Sender<PlayerEvent>,
    queue: Queue,
    current: Option<Track>,
    status: PlaybackStatus,
    /// Bumped by every play request; doubles as the output ticket.
    generation: u64,
    position: f64,
    duration: f64,
    /// Track already acquired for the current play request. A second failed
    /// probe for it is an error rather than another acquisition.
    acquired: Option<String>,
}

impl PlayerEngine {
    pub fn new(
        source: Arc<dyn TrackSource>,
        output: Arc<dyn AudioOutput>,
        media_session: Arc<dyn MediaSession>,
        broadcast_tx: broadcast::Sender<PlayerBroadcast>,
        event_tx: mpsc::Sender<PlayerEvent>,
    ) -> Self {
        Self {
            source,
            output,
            media: MediaControls::new(media_session),
            state_manager: Arc::new(StateManager::new()),
            broadcast_tx,
            event_tx,
            queue: Queue::default(),
            current: None,
            status: PlaybackStatus::Idle,
            generation: 0,
            position: 0.0,
            duration: 0.0,
            acquired: None,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle::new(self.event_tx.clone())
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) -> anyhow::Result<()> {
        info!("PlayerEngine: starting event loop");
        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlayerEngine: event channel closed, shutting down");
                    break;
                }
                Some(PlayerEvent::Shutdown) => {
                    info!("PlayerEngine: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }
        self.cleanup().await;
        Ok(())
    }

    pub(crate) async fn handle_event(&mut self, evt: PlayerEvent) {
        match evt {
            PlayerEvent::Command(cmd) => {
                debug!("PlayerEngine: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            PlayerEvent::Output(out) => self.handle_output(out).await,
            PlayerEvent::Media { generation, action } => {
                if !self.media.is_current(generation) {
                    debug!(generation, ?action, "Dropping media action from stale binding");
                    return;
                }
                self.handle_media(action).await;
            }
            PlayerEvent::ProbeFinished {
                generation,
                track_id,
                result,
            } => self.probe_finished(generation, track_id, result).await,
            PlayerEvent::AcquireFinished {
                generation,
                track_id,
                result,
            } => self.acquire_finished(generation, track_id, result).await,
            PlayerEvent::Shutdown => {}
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PlayTrack(track) => self.start(track, false).await,
            Command::TogglePlayPause => self.toggle_play_pause().await,
            Command::PlayNext => {
                if let Some(next) = self.neighbour(true) {
                    self.start(next, false).await;
                }
            }
            Command::PlayPrevious => {
                if let Some(previous) = self.neighbour(false) {
                    self.start(previous, false).await;
                }
            }
            Command::Seek(position) => self.seek(position).await,
            Command::SetQueue(tracks) => {
                self.queue.set(tracks.clone());
                self.state_manager.set_queue(tracks).await;
                self.notify(PlayerBroadcast::StateUpdated);
            }
            Command::Stop => self.stop().await,
        }
    }

    async fn handle_media(&mut self, action: MediaAction) {
        match action {
            MediaAction::Play if self.status == PlaybackStatus::Paused => {
                self.toggle_play_pause().await
            }
            MediaAction::Pause if self.status.is_playing() => self.toggle_play_pause().await,
            MediaAction::Play | MediaAction::Pause => {}
            MediaAction::Next => self.handle_command(Command::PlayNext).await,
            MediaAction::Previous => self.handle_command(Command::PlayPrevious).await,
            MediaAction::SeekTo(position) => self.seek(position).await,
        }
    }

    // ── playback ──────────────────────────────────────────────────────────────

    /// Make `track` current and start it. `acquired` marks the replay that
    /// follows a successful acquisition.
    async fn start(&mut self, track: Track, acquired: bool) {
        self.generation += 1;
        let generation = self.generation;
        info!(track = %track.id, generation, acquired, "Playing track");

        self.current = Some(track.clone());
        self.acquired = acquired.then(|| track.id.clone());
        self.position = 0.0;
        self.duration = track.duration;
        self.state_manager.set_track(track.clone(), self.duration).await;
        self.set_status(PlaybackStatus::Loading).await;
        if !acquired {
            self.media.rebind(&track, self.event_tx.clone());
            self.notify(PlayerBroadcast::TrackChanged(track.id.clone()));
        }

        let url = self.source.stream_url(&track.id);
        if let Err(e) = self.output.load(&url, generation).await {
            self.fail(&track.id, e.to_string()).await;
            return;
        }

        self.spawn_probe(generation, track.id.clone());
        if !acquired {
            self.spawn_prefetch(&track.id);
        }
    }

    async fn probe_finished(&mut self, generation: u64, track_id: String, result: Result<(), SourceError>) {
        if generation != self.generation {
            debug!(track = %track_id, generation, "Ignoring stale probe result");
            return;
        }
        match result {
            Ok(()) => {
                if self.status == PlaybackStatus::Loading {
                    self.set_status(PlaybackStatus::Playing).await;
                }
            }
            Err(e) if self.acquired.as_deref() == Some(track_id.as_str()) => {
                self.fail(&track_id, format!("still unavailable after download: {}", e))
                    .await;
            }
            Err(e) => {
                info!(track = %track_id, "Probe failed ({}), acquiring", e);
                self.spawn_acquire(generation, track_id);
            }
        }
    }

    async fn acquire_finished(&mut self, generation: u64, track_id: String, result: Result<(), SourceError>) {
        let still_current = generation == self.generation
            && self.current.as_ref().is_some_and(|t| t.id == track_id);
        if !still_current {
            debug!(track = %track_id, generation, "Ignoring acquisition for a track no longer current");
            return;
        }
        match result {
            Ok(()) => {
                let paused = self.status == PlaybackStatus::Paused;
                if let Some(track) = self.current.clone() {
                    self.start(track, true).await;
                }
                if paused && self.status == PlaybackStatus::Loading {
                    self.pause().await;
                }
            }
            Err(e) => self.fail(&track_id, e.to_string()).await,
        }
    }

    async fn toggle_play_pause(&mut self) {
        match self.status {
            PlaybackStatus::Playing | PlaybackStatus::Loading => self.pause().await,
            PlaybackStatus::Paused => match self.output.set_pause(false).await {
                Ok(()) => self.set_status(PlaybackStatus::Playing).await,
                Err(e) => warn!("PlayerEngine: resume failed: {}", e),
            },
            PlaybackStatus::Idle => {
                if let Some(track) = self.current.clone() {
                    self.start(track, false).await;
                }
            }
        }
    }

    async fn pause(&mut self) {
        match self.output.set_pause(true).await {
            Ok(()) => self.set_status(PlaybackStatus::Paused).await,
            Err(e) => warn!("PlayerEngine: pause failed: {}", e),
        }
    }

    /// Seek the output and the reported position together; neither moves if
    /// the output refuses.
    async fn seek(&mut self, position: f64) {
        if self.current.is_none() || self.status == PlaybackStatus::Idle {
            return;
        }
        let target = if self.duration > 0.0 {
            position.clamp(0.0, self.duration)
        } else {
            position.max(0.0)
        };
        if let Err(e) = self.output.seek(target).await {
            warn!("PlayerEngine: seek to {:.1}s failed: {}", target, e);
            return;
        }
        self.update_position(target).await;
    }

    async fn stop(&mut self) {
        // Outstanding probes and acquisitions belong to the stopped request.
        self.generation += 1;
        if let Err(e) = self.output.stop().await {
            warn!("PlayerEngine: stop failed: {}", e);
        }
        self.position = 0.0;
        self.state_manager.set_timeline(0.0, self.duration).await;
        self.set_status(PlaybackStatus::Idle).await;
    }

    async fn fail(&mut self, track_id: &str, message: String) {
        error!(track = %track_id, "Playback failed: {}", message);
        if let Err(e) = self.output.stop().await {
            warn!("PlayerEngine: stop after failure failed: {}", e);
        }
        self.state_manager.set_error(Some(message.clone())).await;
        self.set_status(PlaybackStatus::Idle).await;
        self.notify(PlayerBroadcast::Error(message));
    }

    fn neighbour(&self, forward: bool) -> Option<Track> {
        let current = self.current.as_ref()?;
        let track = if forward {
            self.queue.next_after(&current.id)
        } else {
            self.queue.previous_before(&current.id)
        };
        track.cloned()
    }

    async fn auto_advance(&mut self) {
        match self.neighbour(true) {
            Some(next) => {
                info!(next = %next.id, "Track finished, advancing");
                self.start(next, false).await;
            }
            None => {
                info!("Track finished with an empty queue");
                self.stop().await;
            }
        }
    }

    // ── output events ─────────────────────────────────────────────────────────

    async fn handle_output(&mut self, out: OutputEvent) {
        if out.ticket() != self.generation || self.current.is_none() {
            debug!("Ignoring output event for ticket {}", out.ticket());
            return;
        }
        match out {
            OutputEvent::TimeChanged { position, .. } => self.update_position(position).await,
            OutputEvent::DurationChanged { duration, .. } => {
                self.duration = duration;
                self.state_manager.set_timeline(self.position, duration).await;
                self.notify(PlayerBroadcast::StateUpdated);
                self.check_finished().await;
            }
            OutputEvent::Ended { .. } => {
                if matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
                    self.auto_advance().await;
                }
            }
            OutputEvent::Failed { reason, .. } => {
                if matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
                    if let Some(id) = self.current.as_ref().map(|t| t.id.clone()) {
                        self.fail(&id, reason).await;
                    }
                } else {
                    // While loading the probe decides.
                    debug!("Output failed while loading: {}", reason);
                }
            }
        }
    }

    async fn update_position(&mut self, position: f64) {
        self.position = position;
        self.media.set_position(position, self.duration);
        self.state_manager.set_timeline(position, self.duration).await;
        self.notify(PlayerBroadcast::StateUpdated);
        self.check_finished().await;
    }

    async fn check_finished(&mut self) {
        if self.status != PlaybackStatus::Idle && self.duration > 0.0 && self.position >= self.duration {
            self.auto_advance().await;
        }
    }

    // ── background work ───────────────────────────────────────────────────────

    fn spawn_probe(&self, generation: u64, track_id: String) {
        let source = self.source.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = source.probe(&track_id).await;
            let _ = tx
                .send(PlayerEvent::ProbeFinished {
                    generation,
                    track_id,
                    result,
                })
                .await;
        });
    }

    fn spawn_acquire(&self, generation: u64, track_id: String) {
        let source = self.source.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = source.ensure(&track_id).await;
            let _ = tx
                .send(PlayerEvent::AcquireFinished {
                    generation,
                    track_id,
                    result,
                })
                .await;
        });
    }

    /// Fire-and-forget acquisition of the entry after `track_id`.
    fn spawn_prefetch(&self, track_id: &str) {
        let Some(next) = self.queue.prefetch_candidate(track_id) else {
            return;
        };
        let next_id = next.id.clone();
        let source = self.source.clone();
        debug!(track = %next_id, "Prefetching next track");
        tokio::spawn(async move {
            if let Err(e) = source.ensure(&next_id).await {
                warn!(track = %next_id, "Prefetch failed: {}", e);
            }
        });
    }

    // ── state ─────────────────────────────────────────────────────────────────

    async fn set_status(&mut self, status: PlaybackStatus) {
        if status != self.status {
            info!("PlayerEngine: status {:?} → {:?}", self.status, status);
        }
        self.status = status;
        self.state_manager.set_status(status).await;
        self.notify(PlayerBroadcast::StateUpdated);
    }

    fn notify(&self, msg: PlayerBroadcast) {
        let _ = self.broadcast_tx.send(msg);
    }

    async fn cleanup(&mut self) {
        self.media.release();
        if let Err(e) = self.output.stop().await {
            warn!("PlayerEngine: stop on shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlaybackSnapshot;
    use crate::testing::{track, FakeMedia, FakeOutput, FakeSource};
    use std::time::Duration;

    struct Rig {
        engine: PlayerEngine,
        rx: mpsc::Receiver<PlayerEvent>,
        source: Arc<FakeSource>,
        output: Arc<FakeOutput>,
        media: Arc<FakeMedia>,
        broadcasts: broadcast::Receiver<PlayerBroadcast>,
    }

    impl Rig {
        fn new(cached: &[&str]) -> Self {
            let source = Arc::new(FakeSource::with_cached(cached));
            let output = Arc::new(FakeOutput::default());
            let media = Arc::new(FakeMedia::default());
            let (broadcast_tx, broadcasts) = broadcast::channel(256);
            let (event_tx, rx) = mpsc::channel(64);
            let engine = PlayerEngine::new(
                source.clone(),
                output.clone(),
                media.clone(),
                broadcast_tx,
                event_tx,
            );
            Self {
                engine,
                rx,
                source,
                output,
                media,
                broadcasts,
            }
        }

        async fn send(&mut self, cmd: Command) {
            self.engine.handle_event(PlayerEvent::Command(cmd)).await;
        }

        /// Feed the next self-generated event back into the engine.
        async fn pump(&mut self) {
            let evt = tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("engine produced no event")
                .expect("event channel closed");
            self.engine.handle_event(evt).await;
        }

        async fn output_event(&mut self, out: OutputEvent) {
            self.engine.handle_event(PlayerEvent::Output(out)).await;
        }

        async fn snap(&self) -> PlaybackSnapshot {
            self.engine.state_manager.get_state().await
        }

        fn ticket(&self) -> u64 {
            self.engine.generation
        }
    }

    fn current_id(snap: &PlaybackSnapshot) -> Option<&str> {
        snap.current.as_ref().map(|t| t.id.as_str())
    }

    #[tokio::test]
    async fn test_play_cached_track() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::PlayTrack(track("a", 180.0))).await;

        let snap = rig.snap().await;
        assert_eq!(current_id(&snap), Some("a"));
        assert_eq!(snap.position, 0.0);
        assert!(snap.is_playing);
        assert_eq!(snap.status, PlaybackStatus::Loading);
        assert_eq!(rig.output.loads(), vec![("http://daemon/a".to_string(), 1)]);

        rig.pump().await;
        let snap = rig.snap().await;
        assert_eq!(snap.status, PlaybackStatus::Playing);
        assert!(snap.is_playing && !snap.is_loading);
        assert!(rig.source.ensures().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_play_pause_flips_once_per_call() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::PlayTrack(track("a", 180.0))).await;
        rig.pump().await;

        for _ in 0..3 {
            rig.send(Command::TogglePlayPause).await;
        }
        let snap = rig.snap().await;
        assert!(!snap.is_playing);
        assert_eq!(snap.status, PlaybackStatus::Paused);
        assert_eq!(rig.output.pauses(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_uncached_track_is_acquired_then_replayed() {
        let mut rig = Rig::new(&[]);
        rig.send(Command::PlayTrack(track("a", 180.0))).await;

        rig.pump().await; // probe fails
        assert_eq!(rig.snap().await.status, PlaybackStatus::Loading);
        rig.pump().await; // acquisition done, replay
        rig.pump().await; // probe succeeds

        let snap = rig.snap().await;
        assert_eq!(snap.status, PlaybackStatus::Playing);
        assert_eq!(rig.source.ensures(), vec!["a"]);
        assert_eq!(rig.output.loads().len(), 2);
        assert_eq!(rig.media.published(), vec!["Song a"]);
    }

    #[tokio::test]
    async fn test_skip_during_acquisition_discards_stale_result() {
        let mut rig = Rig::new(&["b"]);
        rig.send(Command::PlayTrack(track("a", 180.0))).await;
        rig.pump().await; // probe for a fails, acquisition spawned

        rig.send(Command::PlayTrack(track("b", 200.0))).await;
        rig.pump().await;
        rig.pump().await;

        let snap = rig.snap().await;
        assert_eq!(current_id(&snap), Some("b"));
        assert_eq!(snap.status, PlaybackStatus::Playing);
        let loaded: Vec<String> = rig.output.loads().into_iter().map(|(url, _)| url).collect();
        assert_eq!(loaded, vec!["http://daemon/a", "http://daemon/b"]);
    }

    #[tokio::test]
    async fn test_failed_acquisition_surfaces_error() {
        let mut rig = Rig::new(&[]);
        rig.source.mark_missing("a");
        rig.send(Command::PlayTrack(track("a", 180.0))).await;
        rig.pump().await;
        rig.pump().await;

        let snap = rig.snap().await;
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert!(!snap.is_loading);
        assert!(snap.last_error.unwrap().contains("not found"));
        assert!(rig.output.stops() >= 1);

        let mut saw_error = false;
        while let Ok(msg) = rig.broadcasts.try_recv() {
            saw_error |= matches!(msg, PlayerBroadcast::Error(_));
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_probe_failing_after_acquisition_does_not_loop() {
        let mut rig = Rig::new(&[]);
        rig.source.mark_broken("a");
        rig.send(Command::PlayTrack(track("a", 180.0))).await;
        rig.pump().await; // probe fails
        rig.pump().await; // acquired, replay
        rig.pump().await; // probe fails again

        let snap = rig.snap().await;
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert!(snap.last_error.is_some());
        assert_eq!(rig.source.ensures(), vec!["a"]);
        assert!(rig.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_auto_advance_when_position_reaches_duration() {
        let mut rig = Rig::new(&["a", "b"]);
        rig.send(Command::SetQueue(vec![track("a", 180.0), track("b", 200.0)]))
            .await;
        rig.send(Command::PlayTrack(track("a", 180.0))).await;
        rig.pump().await;

        let ticket = rig.ticket();
        rig.output_event(OutputEvent::TimeChanged { ticket, position: 90.0 }).await;
        assert_eq!(current_id(&rig.snap().await), Some("a"));

        rig.output_event(OutputEvent::TimeChanged { ticket, position: 180.0 }).await;
        let snap = rig.snap().await;
        assert_eq!(current_id(&snap), Some("b"));
        assert_eq!(snap.position, 0.0);
        assert_eq!(snap.duration, 200.0);
    }

    #[tokio::test]
    async fn test_single_track_queue_restarts_once() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::SetQueue(vec![track("a", 60.0)])).await;
        rig.send(Command::PlayTrack(track("a", 60.0))).await;
        rig.pump().await;

        let first = rig.ticket();
        rig.output_event(OutputEvent::TimeChanged { ticket: first, position: 60.0 }).await;
        let second = rig.ticket();
        assert_eq!(second, first + 1);

        // Late events from the finished load are stale.
        rig.output_event(OutputEvent::TimeChanged { ticket: first, position: 61.0 }).await;
        rig.output_event(OutputEvent::Ended { ticket: first }).await;
        assert_eq!(rig.ticket(), second);
        assert_eq!(rig.snap().await.position, 0.0);
    }

    #[tokio::test]
    async fn test_ended_with_empty_queue_goes_idle() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::PlayTrack(track("a", 60.0))).await;
        rig.pump().await;

        let ticket = rig.ticket();
        rig.output_event(OutputEvent::Ended { ticket }).await;
        let snap = rig.snap().await;
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert_eq!(current_id(&snap), Some("a"));
    }

    #[tokio::test]
    async fn test_next_then_previous_round_trip() {
        let mut rig = Rig::new(&["a", "b", "c"]);
        let queue = vec![track("a", 1.0), track("b", 1.0), track("c", 1.0)];
        rig.send(Command::SetQueue(queue)).await;
        rig.send(Command::PlayTrack(track("c", 1.0))).await;

        rig.send(Command::PlayNext).await;
        assert_eq!(current_id(&rig.snap().await), Some("a"));
        rig.send(Command::PlayPrevious).await;
        assert_eq!(current_id(&rig.snap().await), Some("c"));
    }

    #[tokio::test]
    async fn test_next_without_queue_or_current_is_noop() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::PlayNext).await;
        assert!(rig.snap().await.current.is_none());

        rig.send(Command::PlayTrack(track("a", 1.0))).await;
        let ticket = rig.ticket();
        rig.send(Command::PlayNext).await;
        rig.send(Command::PlayPrevious).await;
        assert_eq!(rig.ticket(), ticket);
    }

    #[tokio::test]
    async fn test_prefetches_following_track_only() {
        let mut rig = Rig::new(&["a", "b", "c"]);
        let queue = vec![track("a", 1.0), track("b", 1.0), track("c", 1.0)];
        rig.send(Command::SetQueue(queue)).await;

        rig.send(Command::PlayTrack(track("a", 1.0))).await;
        rig.source.wait_for_ensures(1).await;
        assert_eq!(rig.source.ensures(), vec!["b"]);

        rig.send(Command::PlayTrack(track("c", 1.0))).await;
        rig.pump().await;
        rig.pump().await;
        assert_eq!(rig.source.ensures(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_stale_media_binding_is_ignored() {
        let mut rig = Rig::new(&["a", "b"]);
        rig.send(Command::PlayTrack(track("a", 100.0))).await;
        rig.pump().await;
        let stale = rig.media.handlers().unwrap();

        rig.send(Command::PlayTrack(track("b", 100.0))).await;
        rig.pump().await;
        assert!(stale.invoke(MediaAction::Pause));
        rig.pump().await;
        assert_eq!(rig.snap().await.status, PlaybackStatus::Playing);

        assert!(rig.media.press(MediaAction::Pause));
        rig.pump().await;
        assert_eq!(rig.snap().await.status, PlaybackStatus::Paused);
        assert!(rig.media.unbinds() >= 1);
    }

    #[tokio::test]
    async fn test_seek_moves_output_and_reported_position_together() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::PlayTrack(track("a", 100.0))).await;
        rig.pump().await;

        rig.send(Command::Seek(30.0)).await;
        assert_eq!(rig.output.seeks(), vec![30.0]);
        assert_eq!(rig.snap().await.position, 30.0);
        assert_eq!(rig.media.last_position(), Some((30.0, 100.0)));

        rig.output.fail_seeks();
        rig.send(Command::Seek(50.0)).await;
        assert_eq!(rig.snap().await.position, 30.0);
        assert_eq!(rig.media.last_position(), Some((30.0, 100.0)));
    }

    #[tokio::test]
    async fn test_output_failure_while_playing() {
        let mut rig = Rig::new(&["a"]);
        rig.send(Command::PlayTrack(track("a", 100.0))).await;
        let ticket = rig.ticket();

        // Failures during loading are left to the probe.
        rig.output_event(OutputEvent::Failed { ticket, reason: "404".into() }).await;
        assert_eq!(rig.snap().await.status, PlaybackStatus::Loading);

        rig.pump().await;
        rig.output_event(OutputEvent::Failed { ticket, reason: "decoder".into() }).await;
        let snap = rig.snap().await;
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert_eq!(snap.last_error.as_deref(), Some("decoder"));
    }

    #[tokio::test]
    async fn test_run_loop_serves_handle() {
        let source = Arc::new(FakeSource::with_cached(&["a"]));
        let output = Arc::new(FakeOutput::default());
        let (broadcast_tx, mut broadcast_rx) = broadcast::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let engine = PlayerEngine::new(
            source,
            output.clone(),
            Arc::new(FakeMedia::default()),
            broadcast_tx,
            event_tx,
        );
        let handle = engine.handle();
        let state = engine.state_manager();
        let task = tokio::spawn(engine.run(event_rx));

        handle.play_track(track("a", 10.0)).await.unwrap();
        loop {
            let msg = broadcast_rx.recv().await.unwrap();
            if matches!(msg, PlayerBroadcast::StateUpdated)
                && state.get_state().await.status == PlaybackStatus::Playing
            {
                break;
            }
        }

        handle.shutdown().await;
        task.await.unwrap().unwrap();
        assert!(output.stops() >= 1);
    }
}
