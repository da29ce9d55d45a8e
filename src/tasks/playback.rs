use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{MAX_FPS, MIN_FPS};
use crate::events::{PlaybackCommand, PlaybackEvent, ViewMode};
use crate::frames::FrameList;

/// Whether the grid may offer deleting a frame: at least one frame must stay selectable.
pub fn deletion_allowed(mode: ViewMode, frames: usize) -> bool {
    mode == ViewMode::Grid && frames > 1
}

/// Playback position and controls, independent of any timer.
#[derive(Debug, Clone)]
pub struct Playback {
    len: usize,
    current: usize,
    playing: bool,
    mode: ViewMode,
    fps: u32,
}

impl Playback {
    pub fn new(fps: u32) -> Self {
        Self {
            len: 0,
            current: 0,
            playing: true,
            mode: ViewMode::Preview,
            fps: fps.clamp(MIN_FPS, MAX_FPS),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// The timer runs only in preview mode, while playing, with frames to show.
    pub fn is_ticking(&self) -> bool {
        self.mode == ViewMode::Preview && self.playing && self.len > 0
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps))
    }

    pub fn loop_meaningful(&self) -> bool {
        self.len >= 2
    }

    /// Advance one frame, wrapping to 0. Returns the new index if it changed.
    pub fn tick(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let next = (self.current + 1) % self.len;
        if next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }

    /// Adopt a new frame count. An index that falls off the end resets to 0.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        if self.current >= len {
            self.current = 0;
        }
    }

    /// Pausing and resuming keep the current index.
    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn toggle_playing(&mut self) {
        self.playing = !self.playing;
    }

    pub fn set_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps.clamp(MIN_FPS, MAX_FPS);
    }
}

/// Drives the preview loop.
///
/// Exactly one [`Interval`] exists at a time. It is rebuilt whenever fps,
/// view mode, play state or the frame list change, and dropped whenever
/// playback should not tick; leaving the loop drops it as well.
pub async fn run(
    mut frames: watch::Receiver<FrameList>,
    mut commands: Receiver<PlaybackCommand>,
    events: Sender<PlaybackEvent>,
    fps: u32,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = Playback::new(fps);
    let mut list: FrameList = frames.borrow_and_update().clone();
    let mut ticker: Option<Interval> = None;
    let mut commands_open = true;

    state.set_len(list.len());
    if !list.is_empty() && !announce_list(&state, &list, &events).await {
        return Ok(());
    }
    reschedule(&state, &mut ticker);

    loop {
        select! {
            _ = cancel.cancelled() => break,

            changed = frames.changed() => {
                if changed.is_err() {
                    debug!("frame source closed; stopping playback");
                    break;
                }
                list = frames.borrow_and_update().clone();
                state.set_len(list.len());
                reschedule(&state, &mut ticker);
                if !announce_list(&state, &list, &events).await {
                    break;
                }
            }

            maybe_cmd = commands.recv(), if commands_open => {
                let Some(cmd) = maybe_cmd else {
                    commands_open = false;
                    continue;
                };
                debug!(?cmd, "playback command");
                match cmd {
                    PlaybackCommand::TogglePlay => state.toggle_playing(),
                    PlaybackCommand::SetPlaying(playing) => state.set_playing(playing),
                    PlaybackCommand::SetMode(mode) => state.set_mode(mode),
                    PlaybackCommand::SetFps(fps) => state.set_fps(fps),
                }
                reschedule(&state, &mut ticker);
            }

            _ = next_tick(&mut ticker) => {
                if let Some(index) = state.tick() {
                    trace!(index, "advance");
                    let id = list[index].id.clone();
                    if events.send(PlaybackEvent::Shown { index, id }).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Replace (or drop) the timer to match the current state.
fn reschedule(state: &Playback, ticker: &mut Option<Interval>) {
    *ticker = state.is_ticking().then(|| {
        let period = state.interval();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn announce_list(state: &Playback, list: &FrameList, events: &Sender<PlaybackEvent>) -> bool {
    if list.is_empty() {
        return events.send(PlaybackEvent::Cleared).await.is_ok();
    }
    let index = state.current();
    let shown = PlaybackEvent::Shown {
        index,
        id: list[index].id.clone(),
    };
    if events.send(shown).await.is_err() {
        return false;
    }
    if !state.loop_meaningful() {
        return events
            .send(PlaybackEvent::LoopUnavailable { frames: list.len() })
            .await
            .is_ok();
    }
    true
}
