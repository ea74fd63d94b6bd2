use anyhow::{anyhow, bail, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::{fs, io::Cursor, path::Path, sync::Arc, time::Duration};
use tracing::debug;

use crate::types::Track;

pub trait AudioOutput {
    // Loads paused at zero; the previous source is silenced first.
    fn load(&mut self, track: &Track) -> Result<()>;
    // After a natural end this restarts from zero.
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    // Seeking a finished source re-primes it, so a later `play` starts there.
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn position(&self) -> Duration;
    // May become known after `load`. rodio reports it from the decoder at load
    // time or not at all (e.g. VBR mp3 without a header).
    fn duration(&self) -> Option<Duration>;
    fn is_finished(&self) -> bool;
}

type AudioBytes = Arc<[u8]>;

pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    http: reqwest::blocking::Client,
    sink: Option<Sink>,
    bytes: Option<AudioBytes>,
    duration: Option<Duration>,
}

impl RodioOutput {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("failed to open audio output")?;
        let http = reqwest::blocking::Client::builder()
            .use_rustls_tls()
            .timeout(request_timeout)
            .build()
            .context("failed to build audio fetch client")?;
        Ok(Self { _stream: stream, handle, http, sink: None, bytes: None, duration: None })
    }

    fn fetch(&self, location: &str) -> Result<AudioBytes> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self
                .http
                .get(location)
                .send()
                .with_context(|| format!("failed to fetch {location}"))?;
            if !response.status().is_success() {
                bail!("audio request for {location} responded with {}", response.status());
            }
            let body = response.bytes().context("failed to read audio body")?;
            return Ok(Arc::from(body.as_ref()));
        }

        let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
        let data =
            fs::read(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Arc::from(data))
    }

    fn rewind(&mut self) -> Result<()> {
        let bytes = self.bytes.clone().ok_or_else(|| anyhow!("nothing loaded"))?;
        self.stop();
        self.start_sink(bytes)
    }

    fn start_sink(&mut self, bytes: AudioBytes) -> Result<()> {
        let decoder = Decoder::new(Cursor::new(bytes)).context("failed to decode audio")?;
        if self.duration.is_none() {
            self.duration = decoder.total_duration();
        }
        let sink = Sink::try_new(&self.handle).context("failed to create audio sink")?;
        sink.pause();
        sink.append(decoder);
        self.sink = Some(sink);
        Ok(())
    }
}

impl AudioOutput for RodioOutput {
    fn load(&mut self, track: &Track) -> Result<()> {
        self.stop();
        self.bytes = None;
        self.duration = None;

        let bytes = self.fetch(&track.audio_url)?;
        self.start_sink(bytes.clone())?;
        self.bytes = Some(bytes);
        debug!("loaded {} ({:?})", track.title, self.duration);
        Ok(())
    }

    fn play(&mut self) {
        if self.is_finished() {
            if let Err(err) = self.rewind() {
                debug!("failed to restart audio: {err:#}");
                return;
            }
        }
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        if self.is_finished() {
            self.rewind()?;
        }
        let sink = self.sink.as_ref().ok_or_else(|| anyhow!("nothing loaded"))?;
        let target = match self.duration {
            Some(total) => position.min(total),
            None => position,
        };
        sink.try_seek(target).map_err(|err| anyhow!("seek failed: {err}"))
    }

    fn position(&self) -> Duration {
        self.sink.as_ref().map(|sink| sink.get_pos()).unwrap_or_default()
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().map(|sink| sink.empty()).unwrap_or(self.bytes.is_some())
    }
}
