use anyhow::{anyhow, Context, Result};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, sync::Arc};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};
use tracing::{error, info};

mod api;
mod app;
mod config;
mod playback;
mod types;
mod ui;
mod watcher;

use app::{AppCommand, AppEvent, AppState};
use config::AppConfig;
use playback::{PlayerHandle, RodioOutput};
use types::{SongScope, TrackId};
use watcher::{JobWatcher, PollPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    info!("starting lofi client");

    let config = AppConfig::load()?;
    let client =
        api::Client::new(config.backend_url(), config.session_cookie(), config.request_timeout())?;

    let request_timeout = config.request_timeout();
    let player = PlayerHandle::spawn(move || RodioOutput::new(request_timeout), config.progress_tick())
        .context("failed to start playback")?;

    let (event_tx, mut event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();

    let controller = Controller::new(client.clone(), event_tx.clone(), config.poll_policy());
    controller.spawn(command_rx);

    let mut app_state = AppState::new();
    seed_health_status(&client, &mut app_state).await;
    app_state.loading_songs = true;
    let _ = command_tx.send(AppCommand::LoadSongs { scope: app_state.scope });

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    enable_raw_mode()?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let ui_result = ui::run(
        &mut terminal,
        &mut app_state,
        ui::UiContext {
            events: &mut event_rx,
            commands: command_tx.clone(),
            player: &player,
            playback: player.subscribe(),
            seek_step: config.seek_step_seconds(),
        },
    );

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    player.shutdown();
    info!("lofi client stopped");
    ui_result
}

async fn seed_health_status(client: &api::Client, app: &mut AppState) {
    let base_url = client.base_url().to_string();
    match client.health().await {
        Ok(body) => {
            let status = body.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
            app.handle_event(AppEvent::Info(format!("Backend: {status} @ {base_url}")));
        }
        Err(err) => {
            app.handle_event(AppEvent::Error(format!(
                "Backend health check failed @ {base_url}: {err:#}"
            )));
        }
    }
}

fn setup_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}

struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    client: Arc<api::Client>,
    event_tx: UnboundedSender<AppEvent>,
    policy: PollPolicy,
    // Replacing the watcher drops, and so cancels, the previous one.
    watcher: Mutex<Option<JobWatcher>>,
}

impl Controller {
    fn new(client: api::Client, event_tx: UnboundedSender<AppEvent>, policy: PollPolicy) -> Self {
        let inner = ControllerInner {
            client: Arc::new(client),
            event_tx,
            policy,
            watcher: Mutex::new(None),
        };
        Self { inner: Arc::new(inner) }
    }

    fn spawn(self, mut command_rx: UnboundedReceiver<AppCommand>) {
        let inner = self.inner;
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let Err(err) = Controller::handle_command(inner.clone(), command).await {
                    error!("command error: {err:#}");
                    let _ = inner.event_tx.send(AppEvent::Error(format!("{err:#}")));
                }
            }
            if let Some(watcher) = inner.watcher.lock().await.take() {
                watcher.cancel();
            }
        });
    }

    async fn handle_command(inner: Arc<ControllerInner>, command: AppCommand) -> Result<()> {
        match command {
            AppCommand::SubmitPrompt { prompt } => {
                Controller::submit_prompt(inner, prompt).await;
            }
            AppCommand::LoadSongs { scope } => {
                Controller::spawn_song_load(inner, scope);
            }
            AppCommand::ToggleVisibility { id } => {
                Controller::toggle_visibility(inner, id).await?;
            }
        }
        Ok(())
    }

    async fn submit_prompt(inner: Arc<ControllerInner>, prompt: String) {
        let task_id = match inner.client.submit_generation(&prompt).await {
            Ok(task_id) => task_id,
            Err(err) => {
                error!("generation request failed: {err:#}");
                let _ = inner.event_tx.send(AppEvent::SubmitFailed(format!("{err:#}")));
                return;
            }
        };
        info!("prompt submitted as task {task_id}");

        let _ = inner
            .event_tx
            .send(AppEvent::JobQueued { task_id: task_id.clone(), prompt });

        let event_tx = inner.event_tx.clone();
        let watcher =
            JobWatcher::start(inner.client.clone(), task_id, inner.policy, move |event| {
                if event.update.is_terminal() {
                    info!("task {} settled as {:?}", event.job.task_id, event.job.status);
                }
                let _ = event_tx.send(AppEvent::Job(event));
            });
        if let Some(previous) = inner.watcher.lock().await.replace(watcher) {
            if !previous.is_finished() {
                info!("stopped watching task {}", previous.task_id());
            }
        }
    }

    fn spawn_song_load(inner: Arc<ControllerInner>, scope: SongScope) {
        tokio::spawn(async move {
            let event = match inner.client.list_songs(scope).await {
                Ok(tracks) => AppEvent::SongsLoaded { scope, tracks },
                Err(err) => {
                    error!("failed to load {}: {err:#}", scope.label());
                    AppEvent::SongsFailed { scope, message: format!("{err:#}") }
                }
            };
            let _ = inner.event_tx.send(event);
        });
    }

    async fn toggle_visibility(inner: Arc<ControllerInner>, id: TrackId) -> Result<()> {
        let visibility = inner
            .client
            .toggle_visibility(&id)
            .await
            .with_context(|| format!("failed to toggle visibility of song {id}"))?;
        let _ = inner.event_tx.send(AppEvent::VisibilityChanged { id, visibility });
        Ok(())
    }
}
