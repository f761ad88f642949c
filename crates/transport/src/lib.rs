use std::sync::Arc;
use std::time::Duration;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Decoded PCM for one pad, interleaved and immutable.
///
/// Clones share the sample storage, so handing a buffer to the audio thread
/// costs a reference count bump.
///
/// ```
/// use padbank_transport::AudioArc;
///
/// let clip = AudioArc::new(vec![0.1, -0.1, 0.2, -0.2], 48000, 2);
/// assert_eq!(clip.frames(), 2);
/// assert_eq!(clip.frame(1), &[0.2, -0.2]);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert!(
            samples.len() % channels as usize == 0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// The samples of frame `index`, one per channel. Empty past the end.
    #[inline]
    pub fn frame(&self, index: usize) -> &[f32] {
        let width = self.channels as usize;
        index
            .checked_mul(width)
            .and_then(|start| Some(start..start.checked_add(width)?))
            .and_then(|range| self.samples.get(range))
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate.max(1) as f64)
    }

    /// Convert to `target_rate`. Matching rates return a clone of `self`.
    pub fn resample(&self, target_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_rate {
            return Ok(self.clone());
        }
        resample_audio_arc(self, target_rate)
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

/// Identifies one playback of one pad. A fresh id is issued per `play`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Control messages sent from the store to the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Start the voice previously queued under this id.
    Play { voice: VoiceId, gain: f32 },
    /// Halt the voice and rewind it. Unknown ids are ignored.
    Stop { voice: VoiceId },
    SetGain { voice: VoiceId, gain: f32 },
}

/// Notifications sent from the audio thread back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Started(VoiceId),
    /// The voice reached the end of its buffer.
    Finished(VoiceId),
    /// The voice was replaced before it produced any output.
    Interrupted(VoiceId),
}

fn split_channels(audio: &AudioArc) -> Vec<Vec<f32>> {
    let width = audio.channels as usize;
    (0..width)
        .map(|ch| audio.samples.iter().skip(ch).step_by(width).copied().collect())
        .collect()
}

fn join_channels(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        out.extend(planes.iter().map(|plane| plane[i]));
    }
    out
}

/// Sinc-resample `audio` to `target_rate` in a single pass.
pub fn resample_audio_arc(audio: &AudioArc, target_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_rate {
        return Ok(audio.clone());
    }
    if audio.is_empty() {
        return Ok(AudioArc::new(Vec::new(), target_rate, audio.channels));
    }

    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        1.0,
        params,
        audio.frames(),
        audio.channels as usize,
    )?;

    let planes = resampler.process(&split_channels(audio), None)?;
    Ok(AudioArc::new(join_channels(&planes), target_rate, audio.channels))
}
