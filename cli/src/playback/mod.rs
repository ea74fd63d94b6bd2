mod output;
mod session;

pub use output::{AudioOutput, RodioOutput};
pub use session::{PlaybackSession, PlaybackSnapshot, PlaybackState};

use anyhow::{anyhow, Context, Result};
use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::types::{Track, TrackId};

#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Play(Track),
    Pause,
    TogglePlayPause,
    SeekTo(f64),
    SeekBy(f64),
    Shutdown,
}

#[derive(Clone)]
pub struct PlayerHandle {
    tx: Sender<PlayerCommand>,
    state_rx: watch::Receiver<PlaybackSnapshot>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PlayerHandle {
    // `make_output` runs on the playback thread; rodio's stream is not `Send`.
    pub fn spawn<O, F>(make_output: F, tick: Duration) -> Result<Self>
    where
        O: AudioOutput + 'static,
        F: FnOnce() -> Result<O> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<PlayerCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<watch::Receiver<PlaybackSnapshot>>>(1);

        let join = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let session = match make_output() {
                    Ok(output) => PlaybackSession::new(output),
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(session.subscribe()));
                run(session, rx, tick);
            })
            .context("failed to spawn playback thread")?;

        let state_rx = ready_rx
            .recv()
            .map_err(|_| anyhow!("playback thread exited during startup"))??;
        info!("playback ready");
        Ok(Self { tx, state_rx, join: Arc::new(Mutex::new(Some(join))) })
    }

    pub fn play(&self, track: Track) {
        self.send(PlayerCommand::Play(track));
    }

    pub fn pause(&self) {
        self.send(PlayerCommand::Pause);
    }

    pub fn toggle_play_pause(&self) {
        self.send(PlayerCommand::TogglePlayPause);
    }

    pub fn seek_to(&self, seconds: f64) {
        self.send(PlayerCommand::SeekTo(seconds));
    }

    pub fn seek_by(&self, delta_seconds: f64) {
        self.send(PlayerCommand::SeekBy(delta_seconds));
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state_rx.clone()
    }

    pub fn shutdown(&self) {
        self.send(PlayerCommand::Shutdown);
        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }

    fn send(&self, command: PlayerCommand) {
        if self.tx.send(command).is_err() {
            debug!("playback thread is gone; command dropped");
        }
    }
}

fn run<O: AudioOutput>(mut session: PlaybackSession<O>, rx: Receiver<PlayerCommand>, tick: Duration) {
    loop {
        match rx.recv_timeout(tick) {
            Ok(command) => {
                let mut batch = vec![command];
                batch.extend(rx.try_iter());
                let batch = coalesce(batch, session.current().map(|track| &track.id));
                if !batch.into_iter().all(|command| apply(&mut session, command)) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        session.tick();
    }
    session.shutdown();
    debug!("playback thread stopped");
}

// A burst of clicks loads only the last track, but only when that track is
// new to both the session and the burst. Otherwise its `Play` is a resume and
// everything before it still matters, so the batch runs as queued.
fn coalesce(mut batch: Vec<PlayerCommand>, current: Option<&TrackId>) -> Vec<PlayerCommand> {
    if let Some(shutdown) =
        batch.iter().position(|command| matches!(command, PlayerCommand::Shutdown))
    {
        batch.truncate(shutdown + 1);
    }
    let Some(last_play) =
        batch.iter().rposition(|command| matches!(command, PlayerCommand::Play(_)))
    else {
        return batch;
    };
    let PlayerCommand::Play(last) = &batch[last_play] else {
        return batch;
    };
    let seen_before = current == Some(&last.id)
        || batch[..last_play]
            .iter()
            .any(|command| matches!(command, PlayerCommand::Play(track) if track.id == last.id));
    if !seen_before {
        batch.drain(..last_play);
    }
    batch
}

// False when the thread should exit.
fn apply<O: AudioOutput>(session: &mut PlaybackSession<O>, command: PlayerCommand) -> bool {
    match command {
        PlayerCommand::Play(track) => session.play(&track),
        PlayerCommand::Pause => session.pause(),
        PlayerCommand::TogglePlayPause => session.toggle_play_pause(),
        PlayerCommand::SeekTo(seconds) => session.seek_to(seconds),
        PlayerCommand::SeekBy(delta) => {
            let current = session.snapshot().position_seconds;
            session.seek_to((current + delta).max(0.0));
        }
        PlayerCommand::Shutdown => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::session::tests::{track, FakeOutput};
    use super::*;
    use anyhow::bail;
    use tokio::time::timeout;

    fn spawn_fake() -> (PlayerHandle, FakeOutput) {
        let output = FakeOutput { known_duration: Some(Duration::from_secs(90)), ..Default::default() };
        let shared = output.clone();
        let handle = PlayerHandle::spawn(move || Ok(output), Duration::from_millis(10)).unwrap();
        (handle, shared)
    }

    #[tokio::test]
    async fn commands_apply_in_order_and_observers_follow() {
        let (handle, output) = spawn_fake();
        let mut listener = handle.subscribe();

        for id in ["a", "b", "c"] {
            handle.play(track(id));
        }
        let settled = timeout(
            Duration::from_secs(2),
            listener.wait_for(|s| s.track.as_ref().is_some_and(|t| t.id.as_str() == "c")),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        assert!(settled.is_playing);
        assert_eq!(settled.position_seconds, 0.0);
        assert_eq!(
            output.log.lock().unwrap().audible.as_deref(),
            Some("https://cdn.example/c.mp3")
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn seek_by_moves_relative_to_position() {
        let (handle, _output) = spawn_fake();
        let mut listener = handle.subscribe();
        handle.play(track("a"));
        handle.seek_by(30.0);
        handle.seek_by(-10.0);

        let reached = timeout(
            Duration::from_secs(2),
            listener.wait_for(|s| (s.position_seconds - 20.0).abs() < f64::EPSILON),
        )
        .await
        .is_ok();
        assert!(reached);
        handle.shutdown();
    }

    fn run_batch(session: &mut PlaybackSession<FakeOutput>, batch: Vec<PlayerCommand>) {
        let batch = coalesce(batch, session.current().map(|track| &track.id));
        for command in batch {
            apply(session, command);
        }
    }

    #[test]
    fn burst_keeps_only_the_last_new_track() {
        let batch = vec![
            PlayerCommand::Play(track("a")),
            PlayerCommand::SeekTo(12.0),
            PlayerCommand::Play(track("b")),
            PlayerCommand::Pause,
        ];
        let kept = coalesce(batch, None);
        assert_eq!(kept.len(), 2);
        assert!(matches!(&kept[0], PlayerCommand::Play(t) if t.id.as_str() == "b"));
        assert!(matches!(kept[1], PlayerCommand::Pause));

        let kept = coalesce(
            vec![PlayerCommand::Pause, PlayerCommand::Shutdown, PlayerCommand::Play(track("a"))],
            None,
        );
        assert!(matches!(kept.as_slice(), [PlayerCommand::Pause, PlayerCommand::Shutdown]));
    }

    #[test]
    fn switching_away_and_back_within_a_burst_restarts_the_track() {
        let output = FakeOutput { known_duration: Some(Duration::from_secs(120)), ..Default::default() };
        let log = output.log.clone();
        let mut session = PlaybackSession::new(output);
        session.play(&track("a"));
        log.lock().unwrap().advance(Duration::from_secs(40));
        session.tick();
        assert_eq!(session.snapshot().position_seconds, 40.0);

        run_batch(&mut session, vec![PlayerCommand::Play(track("b")), PlayerCommand::Play(track("a"))]);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.track.unwrap().id, TrackId::new("a"));
        assert_eq!(snapshot.position_seconds, 0.0);
        assert!(snapshot.is_playing);
        assert_eq!(log.lock().unwrap().loads.len(), 3);
    }

    #[test]
    fn seek_before_replaying_the_current_track_is_kept() {
        let output = FakeOutput { known_duration: Some(Duration::from_secs(120)), ..Default::default() };
        let mut session = PlaybackSession::new(output);
        session.play(&track("a"));
        session.pause();

        run_batch(&mut session, vec![PlayerCommand::SeekTo(90.0), PlayerCommand::Play(track("a"))]);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.position_seconds, 90.0);
        assert!(snapshot.is_playing);
    }

    #[test]
    fn shutdown_releases_output() {
        let (handle, output) = spawn_fake();
        handle.play(track("a"));
        handle.shutdown();
        assert!(output.log.lock().unwrap().audible.is_none());
        handle.play(track("b"));
    }

    #[test]
    fn output_failure_is_reported_at_spawn() {
        let result = PlayerHandle::spawn(
            || -> Result<FakeOutput> { bail!("no audio device") },
            Duration::from_millis(10),
        );
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("no audio device"));
    }
}
