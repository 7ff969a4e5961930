//! Audio cue channel

use crate::{ChannelError, NotificationChannel};
use alerting::{Alert, Severity};
use futures_util::future::BoxFuture;
use std::f32::consts::PI;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Output sample rate for synthesized cues
pub const SAMPLE_RATE: u32 = 44_100;

/// Fade applied at both ends of a beep to avoid clicks
const FADE_MS: u32 = 5;

/// One beep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration_ms: u32,
    /// Silence after this tone, unless it is the last one
    pub gap_ms: u32,
}

/// A short sequence of beeps at a fixed volume
#[derive(Debug, Clone, PartialEq)]
pub struct ToneSequence {
    tones: Vec<Tone>,
    volume: f32,
}

impl ToneSequence {
    /// Three ascending beeps. Higher severity starts higher and is louder.
    pub fn accident(severity: Severity) -> Self {
        let (base, volume) = match severity {
            Severity::Low => (587.33_f32, 0.5_f32),
            Severity::Medium => (698.46, 0.65),
            Severity::High => (880.0, 0.8),
        };
        let tones = [1.0_f32, 1.25, 1.5]
            .into_iter()
            .map(|step| Tone {
                frequency_hz: base * step,
                duration_ms: 180,
                gap_ms: 70,
            })
            .collect();
        Self { tones, volume }
    }

    /// Two soft beeps for a finished, non-accident result
    pub fn completion() -> Self {
        Self {
            tones: vec![
                Tone {
                    frequency_hz: 523.25,
                    duration_ms: 120,
                    gap_ms: 90,
                },
                Tone {
                    frequency_hz: 659.25,
                    duration_ms: 160,
                    gap_ms: 0,
                },
            ],
            volume: 0.3,
        }
    }

    pub fn tones(&self) -> &[Tone] {
        &self.tones
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn duration(&self) -> Duration {
        let last = self.tones.len().saturating_sub(1);
        let ms: u32 = self
            .tones
            .iter()
            .enumerate()
            .map(|(i, t)| if i == last { t.duration_ms } else { t.duration_ms + t.gap_ms })
            .sum();
        Duration::from_millis(ms as u64)
    }

    /// Render as mono signed 16-bit PCM
    pub fn render_pcm(&self, sample_rate: u32) -> Vec<i16> {
        let samples_for = |ms: u32| (sample_rate as u64 * ms as u64 / 1000) as usize;
        let amplitude = self.volume.clamp(0.0, 1.0) * i16::MAX as f32;
        let last = self.tones.len().saturating_sub(1);
        let mut pcm = Vec::new();

        for (i, tone) in self.tones.iter().enumerate() {
            let len = samples_for(tone.duration_ms);
            let fade = samples_for(FADE_MS).min(len / 2).max(1);
            for n in 0..len {
                let envelope = (n.min(len - 1 - n) as f32 / fade as f32).min(1.0);
                let t = n as f32 / sample_rate as f32;
                let value = (2.0 * PI * tone.frequency_hz * t).sin() * amplitude * envelope;
                pcm.push(value as i16);
            }
            if i != last {
                pcm.extend(std::iter::repeat(0).take(samples_for(tone.gap_ms)));
            }
        }
        pcm
    }
}

/// Something that can play PCM
pub trait AudioBackend: Send + Sync {
    fn play<'a>(&'a self, pcm: &'a [i16], sample_rate: u32) -> BoxFuture<'a, Result<(), ChannelError>>;
}

/// Plays through an external player reading raw PCM on stdin (`aplay` by default)
#[derive(Debug, Clone)]
pub struct CommandAudioBackend {
    program: String,
}

impl CommandAudioBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandAudioBackend {
    fn default() -> Self {
        Self::new("aplay")
    }
}

impl AudioBackend for CommandAudioBackend {
    fn play<'a>(&'a self, pcm: &'a [i16], sample_rate: u32) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            let mut child = Command::new(&self.program)
                .args(["-q", "-f", "S16_LE", "-c", "1", "-r"])
                .arg(sample_rate.to_string())
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| match e.kind() {
                    ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                        ChannelError::Unavailable(format!("{}: {}", self.program, e))
                    }
                    _ => ChannelError::Failed(e.to_string()),
                })?;

            if let Some(mut stdin) = child.stdin.take() {
                let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
                stdin
                    .write_all(&bytes)
                    .await
                    .map_err(|e| ChannelError::Failed(e.to_string()))?;
            }

            let status = child
                .wait()
                .await
                .map_err(|e| ChannelError::Failed(e.to_string()))?;
            if status.success() {
                Ok(())
            } else {
                Err(ChannelError::Failed(format!("{} exited with {}", self.program, status)))
            }
        })
    }
}

/// Audible cue for alerts.
///
/// With no backend, or before [`AudioChannel::activate`] when activation is
/// required, notifying is a silent skip.
pub struct AudioChannel {
    backend: Option<Arc<dyn AudioBackend>>,
    require_activation: bool,
    activated: AtomicBool,
    sample_rate: u32,
}

impl AudioChannel {
    pub fn new(backend: Option<Arc<dyn AudioBackend>>) -> Self {
        Self {
            backend,
            require_activation: false,
            activated: AtomicBool::new(false),
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Stay silent until [`AudioChannel::activate`] is called
    pub fn requiring_activation(mut self) -> Self {
        self.require_activation = true;
        self
    }

    pub fn activate(&self) {
        self.activated.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some() && (!self.require_activation || self.activated.load(Ordering::Relaxed))
    }

    /// Play `sequence`, skipping quietly when the channel is not ready
    pub async fn play(&self, sequence: &ToneSequence) -> Result<(), ChannelError> {
        let backend = match &self.backend {
            Some(backend) if self.is_ready() => backend,
            Some(_) => {
                debug!("Audio not yet activated, skipping cue");
                return Err(ChannelError::Unavailable("audio not activated".to_string()));
            }
            None => {
                debug!("No audio backend, skipping cue");
                return Err(ChannelError::Unavailable("no audio backend".to_string()));
            }
        };

        let pcm = sequence.render_pcm(self.sample_rate);
        backend.play(&pcm, self.sample_rate).await
    }

    /// Completion cue for a finished non-accident result
    pub async fn play_completion(&self) {
        if let Err(e) = self.play(&ToneSequence::completion()).await {
            if !matches!(e, ChannelError::Unavailable(_)) {
                warn!("Completion cue failed: {}", e);
            }
        }
    }
}

impl NotificationChannel for AudioChannel {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move { self.play(&ToneSequence::accident(alert.severity)).await })
    }
}
