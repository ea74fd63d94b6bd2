use crate::{
    types::{GenerationJob, JobStatus, SongScope, Track, TrackId, Visibility},
    watcher::{WatchEvent, WatchUpdate},
};
use chrono::{DateTime, Local};
use indexmap::IndexMap;

const MAX_STATUS_LINES: usize = 8;

const PULSE_MESSAGES: &[&str] = &[
    "Stirring the sound cauldron…",
    "Layering lofi textures…",
    "Warming up the tape hiss…",
    "Dusting off the vinyl crackle…",
    "Nudging the drums behind the beat…",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Prompt,
    Songs,
}

#[derive(Debug, Clone)]
pub struct StatusLine {
    pub content: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub prompt: String,
    pub job: GenerationJob,
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct AppState {
    pub input: String,
    pub focus: Focus,
    pub scope: SongScope,
    pub songs: IndexMap<TrackId, Track>,
    pub selected: Option<TrackId>,
    pub status_lines: Vec<StatusLine>,
    pub job: Option<ActiveJob>,
    pub submitting: bool,
    pub loading_songs: bool,
    refresh_requested: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            input: String::new(),
            focus: Focus::Prompt,
            scope: SongScope::Private,
            songs: IndexMap::new(),
            selected: None,
            status_lines: Vec::new(),
            job: None,
            submitting: false,
            loading_songs: false,
            refresh_requested: false,
        }
    }

    pub fn can_submit(&self) -> bool {
        !self.submitting
            && self.job.as_ref().map(|active| active.job.status.is_terminal()).unwrap_or(true)
    }

    pub fn take_prompt(&mut self) -> Option<String> {
        let prompt = self.input.trim().to_string();
        if prompt.is_empty() || !self.can_submit() {
            return None;
        }
        self.input.clear();
        self.submitting = true;
        self.push_status_line(format!("Submitting \"{prompt}\""));
        Some(prompt)
    }

    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Info(message) => self.push_status_line(message),
            AppEvent::Error(message) => self.push_status_line(format!("Error: {message}")),
            AppEvent::SubmitFailed(message) => {
                self.submitting = false;
                self.push_status_line(format!("Generation failed to start: {message}"));
            }
            AppEvent::JobQueued { task_id, prompt } => {
                self.submitting = false;
                self.push_status_line(format!("Task {task_id} started"));
                self.job = Some(ActiveJob { prompt, job: GenerationJob::new(task_id), detail: None });
            }
            AppEvent::Job(event) => self.apply_watch_event(event),
            AppEvent::SongsLoaded { scope, tracks } => {
                if scope != self.scope {
                    return;
                }
                self.loading_songs = false;
                let count = tracks.len();
                self.songs = tracks.into_iter().map(|track| (track.id.clone(), track)).collect();
                let still_present =
                    self.selected.as_ref().is_some_and(|id| self.songs.contains_key(id));
                if !still_present {
                    self.selected = self.songs.keys().next().cloned();
                }
                self.push_status_line(format!("{}: {count} loaded", scope.label()));
            }
            AppEvent::SongsFailed { scope, message } => {
                if scope == self.scope {
                    self.loading_songs = false;
                }
                self.push_status_line(format!("Could not load {}: {message}", scope.label()));
            }
            AppEvent::VisibilityChanged { id, visibility } => {
                if let Some(track) = self.songs.get_mut(&id) {
                    track.visibility = visibility;
                    let line = format!("\"{}\" is now {}", track.title, visibility.label());
                    self.push_status_line(line);
                }
            }
        }
    }

    fn apply_watch_event(&mut self, event: WatchEvent) {
        let Some(active) = self.job.as_mut() else { return };
        if active.job.task_id != event.job.task_id {
            return;
        }
        active.job = event.job;

        match event.update {
            WatchUpdate::Pending { attempt } => {
                active.detail = Some(pulse_message(attempt).to_string());
            }
            WatchUpdate::Retrying { attempt, error } => {
                active.detail = Some(format!("Status check {attempt} failed, retrying"));
                self.push_status_line(format!("Status check failed: {error}"));
            }
            WatchUpdate::Complete => {
                active.detail = None;
                let line = format!("\"{}\" is ready", active.prompt);
                self.refresh_requested = true;
                self.push_status_line(line);
            }
            WatchUpdate::Failed(reason) => {
                active.detail = Some(reason.to_string());
                let line = format!("\"{}\" failed: {reason}", active.prompt);
                self.push_status_line(line);
            }
        }
    }

    pub fn switch_scope(&mut self) -> SongScope {
        self.scope = self.scope.toggled();
        self.songs.clear();
        self.selected = None;
        self.loading_songs = true;
        self.scope
    }

    pub fn push_status_line(&mut self, content: String) {
        self.status_lines.push(StatusLine { content, timestamp: Local::now() });
        if self.status_lines.len() > MAX_STATUS_LINES {
            let overflow = self.status_lines.len() - MAX_STATUS_LINES;
            self.status_lines.drain(0..overflow);
        }
    }

    pub fn select_next(&mut self) {
        if self.songs.is_empty() {
            self.selected = None;
            return;
        }
        let next_index = self
            .selected
            .as_ref()
            .and_then(|id| self.songs.get_index_of(id))
            .map(|idx| (idx + 1) % self.songs.len())
            .unwrap_or(0);
        self.selected = self.songs.get_index(next_index).map(|(id, _)| id.clone());
    }

    pub fn select_previous(&mut self) {
        if self.songs.is_empty() {
            self.selected = None;
            return;
        }
        let len = self.songs.len();
        let prev_index = self
            .selected
            .as_ref()
            .and_then(|id| self.songs.get_index_of(id))
            .map(|idx| if idx == 0 { len - 1 } else { idx - 1 })
            .unwrap_or(len - 1);
        self.selected = self.songs.get_index(prev_index).map(|(id, _)| id.clone());
    }

    pub fn selected_track(&self) -> Option<&Track> {
        self.selected.as_ref().and_then(|id| self.songs.get(id))
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected.as_ref().and_then(|id| self.songs.get_index_of(id))
    }

    pub fn job_label(&self) -> Option<String> {
        let active = self.job.as_ref()?;
        let status = match active.job.status {
            JobStatus::Unknown | JobStatus::Pending => JobStatus::Pending.label(),
            other => other.label(),
        };
        Some(match &active.detail {
            Some(detail) => format!("{status}: {detail}"),
            None => status.to_string(),
        })
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Info(String),
    Error(String),
    SubmitFailed(String),
    JobQueued { task_id: String, prompt: String },
    Job(WatchEvent),
    SongsLoaded { scope: SongScope, tracks: Vec<Track> },
    SongsFailed { scope: SongScope, message: String },
    VisibilityChanged { id: TrackId, visibility: Visibility },
}

#[derive(Debug, Clone)]
pub enum AppCommand {
    SubmitPrompt { prompt: String },
    LoadSongs { scope: SongScope },
    ToggleVisibility { id: TrackId },
}

fn pulse_message(attempt: u32) -> &'static str {
    let index = (attempt as usize) % PULSE_MESSAGES.len();
    PULSE_MESSAGES[index]
}

pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let whole = seconds.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}
