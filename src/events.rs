use crate::codec::EncodedImage;
use crate::config::AnimationSettings;
use crate::frames::FrameId;

/// Actions accepted by the session controller task.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SelectImage(EncodedImage),
    /// Fetch and select a remote image; the current selection survives a failed fetch.
    SelectImageUrl(String),
    UpdateSettings(AnimationSettings),
    Generate,
    /// Stop waiting for the in-flight run and drop its result when it lands.
    Abandon,
    DeleteFrame(FrameId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Preview,
    Grid,
}

/// Actions accepted by the playback task.
#[derive(Debug, Clone)]
pub enum PlaybackCommand {
    TogglePlay,
    SetPlaying(bool),
    SetMode(ViewMode),
    SetFps(u32),
}

/// Emitted by the playback task for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The frame at `index` is now the current one.
    Shown { index: usize, id: FrameId },
    /// The frame list became empty; render the "no results" state.
    Cleared,
    /// Fewer than two frames remain, so a looped preview is not meaningful.
    LoopUnavailable { frames: usize },
}
