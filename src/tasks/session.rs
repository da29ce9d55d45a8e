use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, EncodedImage};
use crate::config::{AnimationSettings, MAX_FPS, MIN_FPS};
use crate::error::Error;
use crate::events::SessionCommand;
use crate::frames::{FrameId, FrameList, GeneratedFrame};
use crate::provider::Credential;
use crate::tasks::generator::FrameGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Generating,
    Succeeded,
    Failed,
}

/// Identifies one generate invocation so late results of abandoned runs can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTicket(u64);

/// Identifies one image selection so a remote fetch that lands after a newer
/// selection can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket(u64);

/// Everything the orchestrator needs for one run, captured when the run starts.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub ticket: GenerationTicket,
    pub image: EncodedImage,
    pub prompt: String,
    pub frame_count: usize,
}

/// Read-only view of the session handed to consumers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub selected_image: Option<EncodedImage>,
    pub settings: AnimationSettings,
    pub is_generating: bool,
    pub frames: FrameList,
    pub error: Option<String>,
}

/// Single-writer session state machine.
///
/// Transitions:
/// - `Idle | Succeeded | Failed -> Generating` on [`Session::begin_generation`],
///   which clears the error and the previous frames before any work starts.
/// - `Generating -> Succeeded | Failed` on [`Session::finish_generation`].
/// - `Succeeded -> Succeeded` on [`Session::delete_frame`].
pub struct Session {
    status: SessionStatus,
    selected_image: Option<EncodedImage>,
    settings: AnimationSettings,
    frames: FrameList,
    error: Option<String>,
    generation: u64,
    selection: u64,
}

impl Session {
    pub fn new(settings: AnimationSettings) -> Self {
        Self {
            status: SessionStatus::Idle,
            selected_image: None,
            settings,
            frames: Arc::from(Vec::new()),
            error: None,
            generation: 0,
            selection: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_generating(&self) -> bool {
        self.status == SessionStatus::Generating
    }

    pub fn frames(&self) -> &FrameList {
        &self.frames
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn settings(&self) -> &AnimationSettings {
        &self.settings
    }

    /// Select a local image. Any remote fetch still in flight becomes stale.
    pub fn select_image(&mut self, image: EncodedImage) {
        self.selection += 1;
        self.selected_image = Some(image);
    }

    /// Start a remote selection. The current image stays selected until the fetch lands.
    pub fn begin_fetch(&mut self) -> SelectionTicket {
        self.selection += 1;
        SelectionTicket(self.selection)
    }

    /// Apply a fetch outcome unless a newer selection superseded it; returns whether it was applied.
    pub fn finish_fetch(&mut self, ticket: SelectionTicket, result: Result<EncodedImage, Error>) -> bool {
        if ticket != SelectionTicket(self.selection) {
            debug!(?ticket, "discarding superseded image fetch");
            return false;
        }
        match result {
            Ok(image) => self.selected_image = Some(image),
            Err(err) => {
                warn!(error = %err, "remote image fetch failed; keeping current selection");
                self.report_error(&err);
            }
        }
        true
    }

    /// Settings only shape future runs and playback speed; existing frames are untouched.
    /// Fps is clamped to `MIN_FPS..=MAX_FPS`; a zero frame count is rejected.
    pub fn update_settings(&mut self, mut settings: AnimationSettings) -> Result<(), Error> {
        if settings.frame_count == 0 {
            return Err(Error::Configuration(
                "frame count must be at least 1".to_string(),
            ));
        }
        settings.fps = settings.fps.clamp(MIN_FPS, MAX_FPS);
        self.settings = settings;
        Ok(())
    }

    /// Start a run. Returns `None` (no-op) while a run is in flight or when no
    /// image is selected.
    pub fn begin_generation(&mut self) -> Option<GenerationJob> {
        if self.is_generating() {
            debug!("generate ignored: a run is already in flight");
            return None;
        }
        let image = self.selected_image.clone()?;
        self.generation += 1;
        self.status = SessionStatus::Generating;
        self.error = None;
        self.frames = Arc::from(Vec::new());
        Some(GenerationJob {
            ticket: GenerationTicket(self.generation),
            image,
            prompt: self.settings.effective_prompt().to_string(),
            frame_count: self.settings.frame_count,
        })
    }

    /// Apply the outcome of a run. Results for any ticket other than the
    /// current in-flight one are discarded; returns whether it was applied.
    pub fn finish_generation(
        &mut self,
        ticket: GenerationTicket,
        result: Result<Vec<GeneratedFrame>, Error>,
    ) -> bool {
        if !self.is_generating() || ticket != GenerationTicket(self.generation) {
            debug!(?ticket, "discarding result of an abandoned run");
            return false;
        }
        match result {
            Ok(frames) => {
                info!(frames = frames.len(), "generation succeeded");
                self.frames = Arc::from(frames);
                self.status = SessionStatus::Succeeded;
            }
            Err(err) => {
                warn!(error = %err, "generation failed");
                self.error = Some(err.user_message());
                self.status = SessionStatus::Failed;
            }
        }
        true
    }

    /// Stop waiting for the in-flight run; its result will be dropped when it lands.
    pub fn abandon_generation(&mut self) -> bool {
        if !self.is_generating() {
            return false;
        }
        self.generation += 1;
        self.status = SessionStatus::Idle;
        true
    }

    /// Surface an error that does not belong to a run, such as a failed image fetch.
    pub fn report_error(&mut self, err: &Error) {
        self.error = Some(err.user_message());
    }

    /// Remove one frame by id. Removing the last remaining frame is allowed.
    pub fn delete_frame(&mut self, id: &FrameId) -> bool {
        if self.is_generating() {
            return false;
        }
        let Some(pos) = self.frames.iter().position(|f| &f.id == id) else {
            return false;
        };
        let mut remaining = self.frames.to_vec();
        remaining.remove(pos);
        self.frames = Arc::from(remaining);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            selected_image: self.selected_image.clone(),
            settings: self.settings.clone(),
            is_generating: self.is_generating(),
            frames: self.frames.clone(),
            error: self.error.clone(),
        }
    }
}

/// Collaborators the session task calls out to.
#[derive(Clone)]
pub struct SessionServices {
    pub generator: Arc<FrameGenerator>,
    /// `None` when no credential is configured; runs then fail with a configuration error.
    pub credential: Option<Credential>,
    pub http: reqwest::Client,
}

type RunOutcome = (GenerationTicket, Result<Vec<GeneratedFrame>, Error>);
type FetchOutcome = (SelectionTicket, Result<EncodedImage, Error>);

/// Owns the session and is its only writer.
///
/// Runs and remote fetches execute on spawned tasks; their outcomes come back
/// through this loop, so state is never touched from two places at once.
pub async fn run(
    mut commands: Receiver<SessionCommand>,
    snapshots: watch::Sender<SessionSnapshot>,
    frames: watch::Sender<FrameList>,
    mut session: Session,
    services: SessionServices,
    cancel: CancellationToken,
) -> Result<()> {
    let mut runs: JoinSet<RunOutcome> = JoinSet::new();
    let mut fetches: JoinSet<FetchOutcome> = JoinSet::new();
    let mut commands_open = true;
    publish(&session, &snapshots, &frames);

    loop {
        select! {
            _ = cancel.cancelled() => break,

            maybe_cmd = commands.recv(), if commands_open => {
                let Some(cmd) = maybe_cmd else {
                    commands_open = false;
                    if runs.is_empty() && fetches.is_empty() {
                        break;
                    }
                    continue;
                };
                handle_command(cmd, &mut session, &services, &mut runs, &mut fetches);
                publish(&session, &snapshots, &frames);
            }

            Some(joined) = runs.join_next() => {
                match joined {
                    Ok((ticket, result)) => {
                        session.finish_generation(ticket, result);
                    }
                    Err(err) => warn!("generation task panicked or was aborted: {err}"),
                }
                publish(&session, &snapshots, &frames);
            }

            Some(joined) = fetches.join_next() => {
                match joined {
                    Ok((ticket, result)) => {
                        session.finish_fetch(ticket, result);
                    }
                    Err(err) => warn!("fetch task panicked or was aborted: {err}"),
                }
                publish(&session, &snapshots, &frames);
            }
        }

        if !commands_open && runs.is_empty() && fetches.is_empty() {
            break;
        }
    }

    Ok(())
}

fn handle_command(
    cmd: SessionCommand,
    session: &mut Session,
    services: &SessionServices,
    runs: &mut JoinSet<RunOutcome>,
    fetches: &mut JoinSet<FetchOutcome>,
) {
    match cmd {
        SessionCommand::SelectImage(image) => session.select_image(image),
        SessionCommand::SelectImageUrl(url) => {
            let ticket = session.begin_fetch();
            let http = services.http.clone();
            fetches.spawn(async move { (ticket, codec::encode_from_url(&http, &url).await) });
        }
        SessionCommand::UpdateSettings(settings) => {
            if let Err(err) = session.update_settings(settings) {
                warn!(error = %err, "settings rejected");
                session.report_error(&err);
            }
        }
        SessionCommand::Generate => {
            let Some(job) = session.begin_generation() else {
                return;
            };
            let generator = services.generator.clone();
            let credential = services
                .credential
                .clone()
                .unwrap_or_else(|| Credential::new(""));
            runs.spawn(async move {
                let result = generator
                    .generate(&credential, &job.image, &job.prompt, job.frame_count)
                    .await;
                (job.ticket, result)
            });
        }
        SessionCommand::Abandon => {
            if session.abandon_generation() {
                info!("in-flight generation abandoned");
            }
        }
        SessionCommand::DeleteFrame(id) => {
            if !session.delete_frame(&id) {
                debug!(%id, "delete ignored: no such frame");
            }
        }
    }
}

fn publish(
    session: &Session,
    snapshots: &watch::Sender<SessionSnapshot>,
    frames: &watch::Sender<FrameList>,
) {
    snapshots.send_replace(session.snapshot());
    let current = session.frames().clone();
    frames.send_if_modified(|published| {
        if Arc::ptr_eq(published, &current) {
            false
        } else {
            *published = current;
            true
        }
    });
}
