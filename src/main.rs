//! Binary entrypoint for toon-motion.
//!
//! Wires the session, playback and renderer tasks together and drives them
//! from stdin commands or one-shot flags.

use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use toon_motion::codec::{self, EncodedImage};
use toon_motion::config::Configuration;
use toon_motion::events::{PlaybackCommand, PlaybackEvent, SessionCommand, ViewMode};
use toon_motion::export;
use toon_motion::frames::FrameList;
use toon_motion::provider::GeminiProvider;
use toon_motion::tasks::generator::FrameGenerator;
use toon_motion::tasks::playback::{self, deletion_allowed};
use toon_motion::tasks::session::{self, Session, SessionServices, SessionSnapshot, SessionStatus};

#[derive(Debug, Parser)]
#[command(
    name = "toon-motion",
    version,
    about = "Animate a character image from a motion prompt"
)]
struct Args {
    /// Path to YAML config (built-in defaults when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Character image to animate: a local file or an http(s) URL
    #[arg(long, value_name = "PATH|URL")]
    image: Option<String>,
    /// Motion description
    #[arg(long)]
    prompt: Option<String>,
    /// Number of frames to generate
    #[arg(long = "frames", value_name = "N")]
    frame_count: Option<usize>,
    /// Preview speed in frames per second
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,
    /// Start generating as soon as the image is selected
    #[arg(long)]
    generate: bool,
    /// Generate once, write an animated GIF here and exit
    #[arg(long, value_name = "FILE")]
    gif: Option<PathBuf>,
    /// Generate once, write a ZIP of frame images here and exit
    #[arg(long, value_name = "FILE")]
    zip: Option<PathBuf>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("toon_motion={level}").parse()?);
    fmt().with_env_filter(filter).with_target(false).compact().init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let cfg = match &args.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    }
    .validated()
    .context("invalid configuration values")?;
    debug!("configuration: {cfg:#?}");

    let mut settings = cfg.animation.initial_settings();
    if let Some(prompt) = &args.prompt {
        settings.prompt = prompt.clone();
    }
    if let Some(count) = args.frame_count {
        if !cfg.animation.allows_frame_count(count) {
            bail!(
                "--frames {count} is not one of {:?}",
                cfg.animation.frame_count_choices
            );
        }
        settings.frame_count = count;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps.clamp(toon_motion::config::MIN_FPS, toon_motion::config::MAX_FPS);
    }

    let credential = cfg.credential_from_env();
    if credential.is_none() {
        warn!(
            "provider credential not configured: set {} to enable generation",
            cfg.provider.credential_env
        );
    }

    let provider = GeminiProvider::new(cfg.provider.endpoint.clone(), cfg.provider.request_timeout)
        .context("failed to build provider client")?;
    info!(
        model = %cfg.provider.model,
        timeout = %humantime::format_duration(cfg.provider.request_timeout),
        "provider configured"
    );
    let generator = Arc::new(FrameGenerator::from_config(Arc::new(provider), &cfg.provider));
    let http = reqwest::Client::builder()
        .timeout(cfg.fetch_timeout)
        .build()
        .context("failed to build HTTP client")?;

    // Channels (small/bounded)
    let (session_tx, session_rx) = mpsc::channel::<SessionCommand>(16); // UI -> Session
    let (playback_tx, playback_rx) = mpsc::channel::<PlaybackCommand>(16); // UI -> Playback
    let (events_tx, events_rx) = mpsc::channel::<PlaybackEvent>(64); // Playback -> Renderer
    let session = Session::new(settings.clone());
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
    let (frames_tx, frames_rx) = watch::channel::<FrameList>(Arc::from(Vec::new()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Session controller
    tasks.spawn({
        let services = SessionServices {
            generator,
            credential,
            http: http.clone(),
        };
        let cancel = cancel.clone();
        async move {
            session::run(session_rx, snapshot_tx, frames_tx, session, services, cancel)
                .await
                .context("session task failed")
        }
    });

    // Playback engine
    tasks.spawn({
        let cancel = cancel.clone();
        let fps = settings.fps;
        async move {
            playback::run(frames_rx, playback_rx, events_tx, fps, cancel)
                .await
                .context("playback task failed")
        }
    });

    // Renderer: the terminal stands in for a UI and logs what would be drawn
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            render_events(events_rx, cancel).await;
            Ok(())
        }
    });

    if let Some(source) = &args.image {
        let image = resolve_image(&http, source).await?;
        session_tx.send(SessionCommand::SelectImage(image)).await?;
        info!(source, "character image selected");
    }

    let outcome = if args.gif.is_some() || args.zip.is_some() {
        run_once(&args, &session_tx, snapshot_rx).await
    } else {
        if args.generate {
            session_tx.send(SessionCommand::Generate).await?;
        }
        let ui = Ui {
            http: &http,
            session_tx: &session_tx,
            playback_tx: &playback_tx,
            frame_choices: &cfg.animation.frame_count_choices,
        };
        run_interactive(&ui, snapshot_rx, cancel.clone()).await
    };

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("{err:#}"),
            Err(err) => error!("task join failed: {err}"),
        }
    }
    outcome
}

async fn resolve_image(http: &reqwest::Client, source: &str) -> Result<EncodedImage> {
    let image = if is_url(source) {
        codec::encode_from_url(http, source).await
    } else {
        codec::encode_file(source)
    };
    image.with_context(|| format!("failed to load character image {source}"))
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Generate once, export, and return.
async fn run_once(
    args: &Args,
    session_tx: &mpsc::Sender<SessionCommand>,
    mut snapshots: watch::Receiver<SessionSnapshot>,
) -> Result<()> {
    if args.image.is_none() {
        bail!("--gif/--zip need --image");
    }
    session_tx.send(SessionCommand::Generate).await?;
    let done = snapshots
        .wait_for(|s| matches!(s.status, SessionStatus::Succeeded | SessionStatus::Failed))
        .await
        .context("session ended before generation finished")?
        .clone();
    if let Some(message) = done.error {
        bail!("generation failed: {message}");
    }
    if let Some(path) = &args.gif {
        export_gif(done.frames.clone(), done.settings.fps, path.clone()).await?;
    }
    if let Some(path) = &args.zip {
        export_zip(done.frames.clone(), path.clone()).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UiCommand {
    Image(String),
    Prompt(String),
    Frames(usize),
    Fps(u32),
    Generate,
    Cancel,
    Play,
    Pause,
    Toggle,
    Mode(ViewMode),
    Delete(usize),
    Status,
    ExportGif(PathBuf),
    ExportZip(PathBuf),
    Help,
    Quit,
}

const HELP: &str = "commands: image <path|url>, prompt <text>, frames <n>, fps <n>, generate, cancel, \
play, pause, toggle, grid, preview, delete <n>, status, export-gif <file>, export-zip <file>, quit";

fn parse_command(line: &str) -> Result<UiCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let need = |what: &str| argument(word, rest, what);
    Ok(match word {
        "image" => UiCommand::Image(need("a path or URL")?.to_string()),
        "prompt" => UiCommand::Prompt(rest.to_string()),
        "frames" => UiCommand::Frames(need("a number")?.parse().context("invalid frame count")?),
        "fps" => UiCommand::Fps(need("a number")?.parse().context("invalid fps")?),
        "generate" | "g" => UiCommand::Generate,
        "cancel" => UiCommand::Cancel,
        "play" => UiCommand::Play,
        "pause" => UiCommand::Pause,
        "toggle" | "space" => UiCommand::Toggle,
        "grid" => UiCommand::Mode(ViewMode::Grid),
        "preview" => UiCommand::Mode(ViewMode::Preview),
        "delete" | "rm" => UiCommand::Delete(
            need("a frame number")?
                .parse()
                .context("invalid frame number")?,
        ),
        "status" | "s" => UiCommand::Status,
        "export-gif" => UiCommand::ExportGif(PathBuf::from(need("a file path")?)),
        "export-zip" => UiCommand::ExportZip(PathBuf::from(need("a file path")?)),
        "help" | "?" => UiCommand::Help,
        "quit" | "exit" | "q" => UiCommand::Quit,
        other => bail!("unknown command `{other}`; try `help`"),
    })
}

fn argument<'a>(word: &str, rest: &'a str, what: &str) -> Result<&'a str> {
    if rest.is_empty() {
        bail!("`{word}` needs {what}");
    }
    Ok(rest)
}

/// Handles the interactive loop needs to act on commands.
struct Ui<'a> {
    http: &'a reqwest::Client,
    session_tx: &'a mpsc::Sender<SessionCommand>,
    playback_tx: &'a mpsc::Sender<PlaybackCommand>,
    frame_choices: &'a [usize],
}

async fn run_interactive(
    ui: &Ui<'_>,
    mut snapshots: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    let (line_tx, mut line_rx) = mpsc::channel::<String>(8);
    if io::stdin().is_terminal() {
        println!("{HELP}");
    }
    // stdin EOF ends the session like `quit`
    tokio::task::spawn_blocking(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    break;
                }
            }
        }
    });

    let mut mode = ViewMode::Preview;
    let mut last_status = snapshots.borrow().status;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                if snap.status != last_status {
                    report_status(&snap);
                    last_status = snap.status;
                }
            }

            maybe_line = line_rx.recv() => {
                let Some(line) = maybe_line else {
                    info!("stdin closed; initiating shutdown");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let cmd = match parse_command(&line) {
                    Ok(cmd) => cmd,
                    Err(err) => {
                        println!("{err:#}");
                        continue;
                    }
                };
                if cmd == UiCommand::Quit {
                    break;
                }
                let snap = snapshots.borrow().clone();
                if let Err(err) = apply_command(ui, cmd, &snap, &mut mode).await {
                    println!("{err:#}");
                }
            }
        }
    }
    Ok(())
}

async fn apply_command(
    ui: &Ui<'_>,
    cmd: UiCommand,
    snap: &SessionSnapshot,
    mode: &mut ViewMode,
) -> Result<()> {
    let Ui {
        http,
        session_tx,
        playback_tx,
        frame_choices,
    } = *ui;
    match cmd {
        UiCommand::Image(source) if is_url(&source) => {
            session_tx.send(SessionCommand::SelectImageUrl(source)).await?;
        }
        UiCommand::Image(source) => {
            let image = resolve_image(http, &source).await?;
            session_tx.send(SessionCommand::SelectImage(image)).await?;
            println!("selected {source}");
        }
        UiCommand::Prompt(prompt) => {
            let mut settings = snap.settings.clone();
            settings.prompt = prompt;
            session_tx.send(SessionCommand::UpdateSettings(settings)).await?;
        }
        UiCommand::Frames(count) => {
            if !frame_choices.contains(&count) {
                bail!("frame count must be one of {frame_choices:?}");
            }
            let mut settings = snap.settings.clone();
            settings.frame_count = count;
            session_tx.send(SessionCommand::UpdateSettings(settings)).await?;
        }
        UiCommand::Fps(fps) => {
            let mut settings = snap.settings.clone();
            settings.fps = fps.clamp(toon_motion::config::MIN_FPS, toon_motion::config::MAX_FPS);
            playback_tx.send(PlaybackCommand::SetFps(settings.fps)).await?;
            session_tx.send(SessionCommand::UpdateSettings(settings)).await?;
        }
        UiCommand::Generate => {
            if snap.is_generating {
                bail!("generation already in progress");
            }
            if snap.selected_image.is_none() {
                bail!("select an image first");
            }
            session_tx.send(SessionCommand::Generate).await?;
        }
        UiCommand::Cancel => session_tx.send(SessionCommand::Abandon).await?,
        UiCommand::Play => playback_tx.send(PlaybackCommand::SetPlaying(true)).await?,
        UiCommand::Pause => playback_tx.send(PlaybackCommand::SetPlaying(false)).await?,
        UiCommand::Toggle => playback_tx.send(PlaybackCommand::TogglePlay).await?,
        UiCommand::Mode(next) => {
            *mode = next;
            playback_tx.send(PlaybackCommand::SetMode(next)).await?;
        }
        UiCommand::Delete(number) => {
            if !deletion_allowed(*mode, snap.frames.len()) {
                bail!("deleting needs grid mode and at least two frames");
            }
            let frame = number
                .checked_sub(1)
                .and_then(|i| snap.frames.get(i))
                .ok_or_else(|| anyhow!("no frame {number}"))?;
            session_tx.send(SessionCommand::DeleteFrame(frame.id.clone())).await?;
        }
        UiCommand::Status => report_status(snap),
        UiCommand::ExportGif(path) => export_gif(snap.frames.clone(), snap.settings.fps, path).await?,
        UiCommand::ExportZip(path) => export_zip(snap.frames.clone(), path).await?,
        UiCommand::Help => println!("{HELP}"),
        UiCommand::Quit => {}
    }
    Ok(())
}

fn report_status(snap: &SessionSnapshot) {
    let image = if snap.selected_image.is_some() { "selected" } else { "none" };
    println!(
        "status: {:?} | image: {image} | frames: {} | prompt: {:?} | frame-count: {} | fps: {}",
        snap.status,
        snap.frames.len(),
        snap.settings.prompt,
        snap.settings.frame_count,
        snap.settings.fps
    );
    if let Some(message) = &snap.error {
        println!("error: {message}");
    }
}

async fn export_gif(frames: FrameList, fps: u32, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || export::write_gif(&frames, fps, &path))
        .await
        .context("GIF export task failed")?
        .context("GIF export failed")
}

async fn export_zip(frames: FrameList, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || export::write_zip(&frames, Path::new(&path)))
        .await
        .context("ZIP export task failed")?
        .context("ZIP export failed")
}

async fn render_events(mut events: mpsc::Receiver<PlaybackEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_ev = events.recv() => match maybe_ev {
                Some(PlaybackEvent::Shown { index, id }) => debug!(index, %id, "frame shown"),
                Some(PlaybackEvent::Cleared) => info!("no frames to show"),
                Some(PlaybackEvent::LoopUnavailable { frames }) => {
                    info!(frames, "at least 2 frames are needed for a looped preview");
                }
                None => break,
            }
        }
    }
}
