//! Music-on-hold.
//!
//! One manager task ticks every 20 ms and feeds a fixed-size chunk from
//! each active player to the call's media sink. Sources are WAV files,
//! stream URLs (placeholder audio until a fetcher is wired in), or
//! generated tones. Looping wraps the read position.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use voxbridge_audio_core::wav::load_wav_pcm;

use crate::actions::MediaSink;
use crate::error::{DtmfError, Result};
use crate::tone;

const TICK: Duration = Duration::from_millis(20);

/// Where hold music comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicSourceType {
    File,
    Stream,
    Generated,
}

/// A configured music source.
#[derive(Debug, Clone)]
pub struct MusicSource {
    pub name: String,
    pub source_type: MusicSourceType,
    /// File path, stream URL, or `tone:<hz>` spec for generated sources.
    pub location: String,
    pub loop_enabled: bool,
    pub volume: f32,
    pub sample_rate: u32,
}

impl MusicSource {
    pub fn generated(name: &str, sample_rate: u32) -> Self {
        Self {
            name: name.to_string(),
            source_type: MusicSourceType::Generated,
            location: String::new(),
            loop_enabled: true,
            volume: 0.5,
            sample_rate,
        }
    }
}

struct MusicPlayer {
    audio: Vec<u8>,
    position: usize,
    looping: bool,
    chunks_sent: u64,
}

impl MusicPlayer {
    fn new(audio: Vec<u8>, looping: bool) -> Self {
        Self {
            audio,
            position: 0,
            looping,
            chunks_sent: 0,
        }
    }

    /// Next fixed-size chunk, wrapping when looping. `None` means the
    /// source is exhausted.
    fn next_chunk(&mut self, chunk_size: usize) -> Option<Vec<u8>> {
        if self.audio.is_empty() {
            return None;
        }

        if self.position >= self.audio.len() {
            if self.looping {
                self.position = 0;
            } else {
                return None;
            }
        }

        let end = (self.position + chunk_size).min(self.audio.len());
        let mut chunk = self.audio[self.position..end].to_vec();
        self.position = end;

        // Top up from the start of the buffer when looping past the end.
        if chunk.len() < chunk_size && self.looping {
            let remaining = chunk_size - chunk.len();
            let wrap = remaining.min(self.audio.len());
            chunk.extend_from_slice(&self.audio[..wrap]);
            self.position = wrap;
        }

        self.chunks_sent += 1;
        Some(chunk)
    }
}

/// Manager for all per-call hold-music players.
pub struct MusicOnHoldManager {
    sources: parking_lot::RwLock<HashMap<String, MusicSource>>,
    players: Arc<Mutex<HashMap<String, MusicPlayer>>>,
    sink: Arc<dyn MediaSink>,
    chunk_size: usize,
    default_source: String,
    shutdown_tx: watch::Sender<bool>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    total_sessions: AtomicU64,
}

impl MusicOnHoldManager {
    /// `chunk_size` in bytes; 320 is 20 ms of 8 kHz 16-bit mono.
    pub fn new(sink: Arc<dyn MediaSink>, sample_rate: u32, chunk_size: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let manager = Self {
            sources: parking_lot::RwLock::new(HashMap::new()),
            players: Arc::new(Mutex::new(HashMap::new())),
            sink,
            chunk_size,
            default_source: "default_hold_music".to_string(),
            shutdown_tx,
            task: parking_lot::Mutex::new(None),
            total_sessions: AtomicU64::new(0),
        };
        manager.add_source(MusicSource::generated("default_hold_music", sample_rate));
        manager
    }

    pub fn add_source(&self, source: MusicSource) {
        self.sources.write().insert(source.name.clone(), source);
    }

    pub fn remove_source(&self, name: &str) -> bool {
        self.sources.write().remove(name).is_some()
    }

    /// Begin hold music for a call, loading the named (or default) source.
    pub async fn start_hold_music(&self, call_id: &str, source_name: Option<&str>) -> Result<()> {
        let name = source_name.unwrap_or(&self.default_source);
        let source = self
            .sources
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DtmfError::UnknownSource(name.to_string()))?;

        let audio = self.load_source(&source).await?;
        let audio = tone::apply_volume(&audio, source.volume);

        self.players
            .lock()
            .await
            .insert(call_id.to_string(), MusicPlayer::new(audio, source.loop_enabled));
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.ensure_playback_task();

        tracing::info!(call_id, source = %source.name, "hold music started");
        Ok(())
    }

    /// Stop hold music for a call.
    pub async fn stop_hold_music(&self, call_id: &str) -> bool {
        let removed = self.players.lock().await.remove(call_id);
        if let Some(player) = &removed {
            tracing::info!(call_id, chunks = player.chunks_sent, "hold music stopped");
        }
        removed.is_some()
    }

    async fn load_source(&self, source: &MusicSource) -> Result<Vec<u8>> {
        match source.source_type {
            MusicSourceType::File => {
                let data = tokio::fs::read(&source.location).await?;
                Ok(load_wav_pcm(&data, source.sample_rate)?)
            }
            MusicSourceType::Stream => {
                // Stream fetching is not wired in; fall back to ring-back
                // audio so held callers hear something.
                tracing::warn!(url = %source.location, "stream source not supported, using generated audio");
                Ok(tone::generate_ring_tone(60.0, source.sample_rate))
            }
            MusicSourceType::Generated => {
                if let Some(spec) = source.location.strip_prefix("tone:") {
                    let frequency: f32 = spec.parse().unwrap_or(440.0);
                    Ok(tone::generate_tone(frequency, 30.0, source.sample_rate, 0.3))
                } else {
                    Ok(tone::generate_ring_tone(60.0, source.sample_rate))
                }
            }
        }
    }

    fn ensure_playback_task(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let players = self.players.clone();
        let sink = self.sink.clone();
        let chunk_size = self.chunk_size;
        let mut shutdown = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let mut batch = Vec::new();
                        let mut finished = Vec::new();
                        {
                            let mut players = players.lock().await;
                            for (call_id, player) in players.iter_mut() {
                                match player.next_chunk(chunk_size) {
                                    Some(chunk) => batch.push((call_id.clone(), chunk)),
                                    None => finished.push(call_id.clone()),
                                }
                            }
                            for call_id in &finished {
                                players.remove(call_id);
                            }
                        }
                        for (call_id, chunk) in batch {
                            if !sink.send_audio(&call_id, &chunk).await {
                                tracing::debug!(call_id = %call_id, "media sink refused hold music chunk");
                                players.lock().await.remove(&call_id);
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Stop the playback task and every player.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.players.lock().await.clear();
    }

    pub async fn active_session_count(&self) -> usize {
        self.players.lock().await.len()
    }

    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;

    struct CollectingSink {
        chunks: PlMutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl MediaSink for CollectingSink {
        async fn send_audio(&self, call_id: &str, pcm: &[u8]) -> bool {
            self.chunks.lock().push((call_id.to_string(), pcm.len()));
            true
        }
    }

    #[test]
    fn player_wraps_when_looping() {
        let mut player = MusicPlayer::new(vec![1u8; 500], true);
        assert_eq!(player.next_chunk(320).unwrap().len(), 320);
        // Second chunk needs 140 wrapped bytes.
        let chunk = player.next_chunk(320).unwrap();
        assert_eq!(chunk.len(), 320);
        assert_eq!(player.position, 140);
    }

    #[test]
    fn player_ends_when_not_looping() {
        let mut player = MusicPlayer::new(vec![1u8; 400], false);
        assert_eq!(player.next_chunk(320).unwrap().len(), 320);
        assert_eq!(player.next_chunk(320).unwrap().len(), 80);
        assert!(player.next_chunk(320).is_none());
    }

    #[tokio::test]
    async fn hold_music_flows_to_sink() {
        let sink = Arc::new(CollectingSink {
            chunks: PlMutex::new(Vec::new()),
        });
        let manager = MusicOnHoldManager::new(sink.clone(), 8000, 320);

        manager.start_hold_music("c1", None).await.unwrap();
        assert_eq!(manager.active_session_count().await, 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(manager.stop_hold_music("c1").await);

        let chunks = sink.chunks.lock();
        assert!(!chunks.is_empty(), "expected hold music chunks");
        assert!(chunks.iter().all(|(id, len)| id == "c1" && *len == 320));
        drop(chunks);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_source_is_an_error() {
        let sink = Arc::new(CollectingSink {
            chunks: PlMutex::new(Vec::new()),
        });
        let manager = MusicOnHoldManager::new(sink, 8000, 320);
        assert!(matches!(
            manager.start_hold_music("c1", Some("nope")).await,
            Err(DtmfError::UnknownSource(_))
        ));
    }
}
