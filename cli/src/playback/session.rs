use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use super::output::AudioOutput;
use crate::types::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Paused,
    Playing,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub track: Option<Track>,
    pub is_playing: bool,
    pub position_seconds: f64,
    pub duration_seconds: Option<f64>,
    pub load_error: Option<String>,
}

impl PlaybackSnapshot {
    pub fn state(&self) -> PlaybackState {
        match (&self.track, self.is_playing) {
            (None, _) => PlaybackState::Idle,
            (Some(_), true) => PlaybackState::Playing,
            (Some(_), false) => PlaybackState::Paused,
        }
    }

    pub fn progress_ratio(&self) -> f64 {
        match self.duration_seconds {
            Some(total) if total > 0.0 => (self.position_seconds / total).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

pub struct PlaybackSession<O: AudioOutput> {
    output: O,
    current: Option<Track>,
    is_playing: bool,
    position: f64,
    duration: Option<f64>,
    load_error: Option<String>,
    state_tx: watch::Sender<PlaybackSnapshot>,
}

impl<O: AudioOutput> PlaybackSession<O> {
    pub fn new(output: O) -> Self {
        let (state_tx, _) = watch::channel(PlaybackSnapshot::default());
        Self {
            output,
            current: None,
            is_playing: false,
            position: 0.0,
            duration: None,
            load_error: None,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let position = match self.duration {
            Some(total) => self.position.clamp(0.0, total.max(0.0)),
            None => self.position.max(0.0),
        };
        PlaybackSnapshot {
            track: self.current.clone(),
            is_playing: self.is_playing,
            position_seconds: position,
            duration_seconds: self.duration,
            load_error: self.load_error.clone(),
        }
    }

    // Same id resumes where it left off; anything else stops before loading.
    pub fn play(&mut self, track: &Track) {
        let same_song = self.current.as_ref().is_some_and(|current| current.same_song(track));
        if same_song && self.load_error.is_none() {
            self.resume();
            return;
        }

        self.output.stop();
        self.current = Some(track.clone());
        self.is_playing = false;
        self.position = 0.0;
        self.duration = None;
        self.load_error = None;

        match self.output.load(track) {
            Ok(()) => {
                info!("playing {} ({})", track.title, track.id);
                self.output.play();
                self.is_playing = true;
                self.duration = self.output.duration().map(|d| d.as_secs_f64());
            }
            Err(err) => {
                warn!("failed to load {}: {err:#}", track.audio_url);
                self.load_error = Some(format!("{err:#}"));
            }
        }
        self.publish();
    }

    pub fn resume(&mut self) {
        if self.current.is_none() || self.is_playing || self.load_error.is_some() {
            return;
        }
        if self.output.is_finished() {
            self.position = 0.0;
        }
        self.output.play();
        self.is_playing = true;
        self.publish();
    }

    pub fn pause(&mut self) {
        if !self.is_playing {
            return;
        }
        self.output.pause();
        self.is_playing = false;
        self.position = self.output.position().as_secs_f64();
        self.publish();
    }

    pub fn toggle_play_pause(&mut self) {
        if self.is_playing {
            self.pause();
        } else {
            self.resume();
        }
    }

    pub fn seek_to(&mut self, seconds: f64) {
        if self.current.is_none() || self.load_error.is_some() || !seconds.is_finite() {
            return;
        }
        let target = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);
        if let Err(err) = self.output.seek(target) {
            warn!("seek to {seconds:.1}s failed: {err:#}");
        }
        if self.is_playing {
            self.output.play();
        }
        self.position = self.output.position().as_secs_f64();
        self.publish();
    }

    pub fn tick(&mut self) {
        if !self.is_playing {
            return;
        }
        if self.output.is_finished() {
            self.is_playing = false;
            self.position = 0.0;
            self.publish();
            return;
        }
        self.position = self.output.position().as_secs_f64();
        if self.duration.is_none() {
            self.duration = self.output.duration().map(|d| d.as_secs_f64());
        }
        self.publish();
    }

    pub fn shutdown(&mut self) {
        self.output.stop();
        self.current = None;
        self.is_playing = false;
        self.position = 0.0;
        self.duration = None;
        self.load_error = None;
        self.publish();
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{TrackId, Visibility};
    use anyhow::{bail, Result};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub(crate) struct OutputLog {
        pub loads: Vec<String>,
        pub audible: Option<String>,
        loaded: Option<String>,
        position: Duration,
        duration: Option<Duration>,
        finished: bool,
    }

    impl OutputLog {
        pub fn advance(&mut self, by: Duration) {
            if self.audible.is_none() {
                return;
            }
            self.position += by;
            if let Some(total) = self.duration {
                if self.position >= total {
                    self.position = Duration::ZERO;
                    self.audible = None;
                    self.finished = true;
                }
            }
        }

        pub fn report_duration(&mut self, total: Duration) {
            self.duration = Some(total);
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct FakeOutput {
        pub log: Arc<Mutex<OutputLog>>,
        pub known_duration: Option<Duration>,
    }

    impl AudioOutput for FakeOutput {
        fn load(&mut self, track: &Track) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            assert!(log.audible.is_none(), "previous output still audible during load");
            log.loads.push(track.audio_url.clone());
            if track.audio_url.starts_with("broken:") {
                bail!("decode error");
            }
            log.loaded = Some(track.audio_url.clone());
            log.position = Duration::ZERO;
            log.duration = self.known_duration;
            log.finished = false;
            Ok(())
        }

        fn play(&mut self) {
            let mut log = self.log.lock().unwrap();
            if log.finished {
                log.finished = false;
                log.position = Duration::ZERO;
            }
            log.audible = log.loaded.clone();
        }

        fn pause(&mut self) {
            self.log.lock().unwrap().audible = None;
        }

        fn stop(&mut self) {
            let mut log = self.log.lock().unwrap();
            log.audible = None;
            log.loaded = None;
        }

        fn seek(&mut self, position: Duration) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            if log.loaded.is_none() {
                bail!("nothing loaded");
            }
            log.finished = false;
            log.position = match log.duration {
                Some(total) => position.min(total),
                None => position,
            };
            Ok(())
        }

        fn position(&self) -> Duration {
            self.log.lock().unwrap().position
        }

        fn duration(&self) -> Option<Duration> {
            self.log.lock().unwrap().duration
        }

        fn is_finished(&self) -> bool {
            self.log.lock().unwrap().finished
        }
    }

    pub(crate) fn track(id: &str) -> Track {
        Track {
            id: TrackId::new(id),
            title: format!("Song {id}"),
            audio_url: format!("https://cdn.example/{id}.mp3"),
            visibility: Visibility::Private,
            owner: None,
        }
    }

    fn session() -> (PlaybackSession<FakeOutput>, Arc<Mutex<OutputLog>>) {
        let output = FakeOutput { known_duration: Some(Duration::from_secs(120)), ..Default::default() };
        let log = output.log.clone();
        (PlaybackSession::new(output), log)
    }

    #[test]
    fn idle_operations_are_no_ops() {
        let (mut session, log) = session();
        session.pause();
        session.toggle_play_pause();
        session.seek_to(10.0);
        session.tick();
        assert_eq!(session.snapshot().state(), PlaybackState::Idle);
        assert!(log.lock().unwrap().loads.is_empty());
    }

    #[test]
    fn switching_tracks_stops_the_previous_one() {
        let (mut session, log) = session();
        session.play(&track("a"));
        log.lock().unwrap().advance(Duration::from_secs(30));
        session.tick();
        assert_eq!(session.snapshot().position_seconds, 30.0);

        session.play(&track("b"));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.track.map(|t| t.id), Some(TrackId::new("b")));
        assert_eq!(snapshot.position_seconds, 0.0);
        assert!(snapshot.is_playing);
        assert_eq!(log.lock().unwrap().audible.as_deref(), Some("https://cdn.example/b.mp3"));
    }

    #[test]
    fn rapid_clicks_leave_only_the_last_track_playing() {
        let (mut session, log) = session();
        for id in ["a", "b", "c", "b", "d"] {
            session.play(&track(id));
        }
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state(), PlaybackState::Playing);
        assert_eq!(snapshot.track.unwrap().id, TrackId::new("d"));
        let log = log.lock().unwrap();
        assert_eq!(log.audible.as_deref(), Some("https://cdn.example/d.mp3"));
        assert_eq!(log.loads.len(), 5);
    }

    #[test]
    fn replaying_current_track_keeps_position() {
        let (mut session, log) = session();
        session.play(&track("a"));
        log.lock().unwrap().advance(Duration::from_secs(42));
        session.tick();

        session.play(&track("a"));
        assert_eq!(session.snapshot().position_seconds, 42.0);

        session.pause();
        session.play(&track("a"));
        let snapshot = session.snapshot();
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.position_seconds, 42.0);
        assert_eq!(log.lock().unwrap().loads.len(), 1);
    }

    #[test]
    fn refetched_track_with_same_id_is_not_reloaded() {
        let (mut session, log) = session();
        session.play(&track("a"));
        let mut refreshed = track("a");
        refreshed.title = "Renamed".into();
        refreshed.audio_url = "https://cdn.example/a-v2.mp3".into();
        session.play(&refreshed);
        assert_eq!(log.lock().unwrap().loads.len(), 1);
    }

    #[test]
    fn toggle_pauses_and_resumes() {
        let (mut session, log) = session();
        session.play(&track("a"));
        session.toggle_play_pause();
        assert_eq!(session.snapshot().state(), PlaybackState::Paused);
        assert!(log.lock().unwrap().audible.is_none());
        session.toggle_play_pause();
        assert_eq!(session.snapshot().state(), PlaybackState::Playing);
    }

    #[test]
    fn natural_end_pauses_at_zero_and_replays() {
        let (mut session, log) = session();
        session.play(&track("a"));
        log.lock().unwrap().advance(Duration::from_secs(200));
        session.tick();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state(), PlaybackState::Paused);
        assert_eq!(snapshot.position_seconds, 0.0);

        session.toggle_play_pause();
        assert!(session.snapshot().is_playing);
        assert!(log.lock().unwrap().audible.is_some());
    }

    #[test]
    fn seek_after_natural_end_sets_the_resume_point() {
        let (mut session, log) = session();
        session.play(&track("a"));
        log.lock().unwrap().advance(Duration::from_secs(200));
        session.tick();

        session.seek_to(30.0);
        assert_eq!(session.snapshot().position_seconds, 30.0);
        session.toggle_play_pause();

        let snapshot = session.snapshot();
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.position_seconds, 30.0);
        assert_eq!(log.lock().unwrap().position, Duration::from_secs(30));
    }

    #[test]
    fn play_after_shutdown_reloads() {
        let (mut session, log) = session();
        session.play(&track("a"));
        session.shutdown();
        assert_eq!(session.snapshot().state(), PlaybackState::Idle);

        session.play(&track("a"));
        assert!(session.snapshot().is_playing);
        let log = log.lock().unwrap();
        assert_eq!(log.loads.len(), 2);
        assert_eq!(log.audible.as_deref(), Some("https://cdn.example/a.mp3"));
    }

    #[test]
    fn seek_is_clamped_to_duration() {
        let (mut session, _log) = session();
        session.play(&track("a"));
        session.seek_to(500.0);
        assert_eq!(session.snapshot().position_seconds, 120.0);
        session.seek_to(-3.0);
        assert_eq!(session.snapshot().position_seconds, 0.0);
        session.seek_to(f64::NAN);
        assert_eq!(session.snapshot().position_seconds, 0.0);
    }

    #[test]
    fn unknown_duration_reports_zero_progress_until_known() {
        let output = FakeOutput::default();
        let log = output.log.clone();
        let mut session = PlaybackSession::new(output);
        session.play(&track("a"));
        log.lock().unwrap().advance(Duration::from_secs(5));
        session.tick();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.duration_seconds, None);
        assert_eq!(snapshot.progress_ratio(), 0.0);

        log.lock().unwrap().report_duration(Duration::from_secs(20));
        session.tick();
        assert_eq!(session.snapshot().duration_seconds, Some(20.0));
        assert_eq!(session.snapshot().progress_ratio(), 0.25);
    }

    #[test]
    fn load_failure_keeps_track_but_not_playing() {
        let (mut session, log) = session();
        let mut broken = track("x");
        broken.audio_url = "broken:x".into();
        session.play(&broken);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.track.as_ref().map(|t| t.id.clone()), Some(TrackId::new("x")));
        assert!(!snapshot.is_playing);
        assert!(snapshot.load_error.as_deref().unwrap().contains("decode error"));
        assert_eq!(snapshot.progress_ratio(), 0.0);

        session.toggle_play_pause();
        assert!(!session.snapshot().is_playing);

        session.play(&broken);
        assert_eq!(log.lock().unwrap().loads.len(), 2);
    }

    #[test]
    fn observers_see_each_change() {
        let (mut session, _log) = session();
        let mut first = session.subscribe();
        let second = session.subscribe();
        session.play(&track("a"));
        assert!(first.has_changed().unwrap());
        assert_eq!(first.borrow_and_update().track.as_ref().unwrap().id, TrackId::new("a"));
        assert!(second.borrow().is_playing);
    }
}
