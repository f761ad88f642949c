use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use padbank_transport::{AudioArc, Command, Status, VoiceId};

pub type SharedAudio = Shared<AudioArc>;

/// A buffer queued for playback under `id`, started by a later
/// [`Command::Play`].
pub struct QueuedVoice {
    pub id: VoiceId,
    pub audio: SharedAudio,
}

struct ActiveVoice {
    id: VoiceId,
    audio: SharedAudio,
    gain: f32,
    position: f64,
    step: f64,
}

pub struct AudioEngineHandle {
    pub commands: rtrb::Producer<Command>,
    pub status: rtrb::Consumer<Status>,
    pub voices: rtrb::Producer<QueuedVoice>,
    pub collector: Collector,
    pub handle: Handle,
    pub sample_rate: u32,
    _stream: cpal::Stream,
}

impl AudioEngineHandle {
    /// Queue `audio` and start it at `gain`.
    pub fn play(&mut self, id: VoiceId, audio: AudioArc, gain: f32) -> anyhow::Result<()> {
        let audio = Shared::new(&self.handle, audio);
        self.voices
            .push(QueuedVoice { id, audio })
            .map_err(|_| anyhow::anyhow!("voice queue is full"))?;
        self.commands
            .push(Command::Play { voice: id, gain })
            .map_err(|_| anyhow::anyhow!("command queue is full"))
    }

    pub fn stop(&mut self, id: VoiceId) {
        let _ = self.commands.push(Command::Stop { voice: id });
    }

    pub fn set_gain(&mut self, id: VoiceId, gain: f32) {
        let _ = self.commands.push(Command::SetGain { voice: id, gain });
    }

    /// Free buffers the audio thread has let go of. A voice stopped with
    /// [`stop`](Self::stop) is only released once the stream has run another
    /// callback.
    pub fn collect(&mut self) {
        self.collector.collect();
    }
}

/// Open the default output device and start a stream playing one voice at a
/// time.
pub fn start() -> anyhow::Result<AudioEngineHandle> {
    let collector = Collector::new();
    let handle = collector.handle();

    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(64);
    let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(64);
    let (voices_tx, voices_rx) = rtrb::RingBuffer::<QueuedVoice>::new(8);

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0;
    let channels = config.channels();

    let mixer = Mixer::new(command_rx, voices_rx, status_tx, sample_rate);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), mixer)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), mixer)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;
    log::info!("audio engine started ({sample_rate} Hz, {channels} channels)");

    Ok(AudioEngineHandle {
        commands: command_tx,
        status: status_rx,
        voices: voices_tx,
        collector,
        handle,
        sample_rate,
        _stream: stream,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mixer.render(data, output_channels);
        },
        |err| log::error!("stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

/// Audio-thread half of the engine.
///
/// Everything here runs inside the output callback, so it never allocates
/// and never blocks. Buffers are released by dropping their `Shared`, which
/// hands them to the collector on the control side.
pub struct Mixer {
    command_rx: rtrb::Consumer<Command>,
    voices_rx: rtrb::Consumer<QueuedVoice>,
    status_tx: rtrb::Producer<Status>,
    output_rate: u32,
    queued: Option<QueuedVoice>,
    active: Option<ActiveVoice>,
}

impl Mixer {
    pub fn new(
        command_rx: rtrb::Consumer<Command>,
        voices_rx: rtrb::Consumer<QueuedVoice>,
        status_tx: rtrb::Producer<Status>,
        output_rate: u32,
    ) -> Self {
        Self {
            command_rx,
            voices_rx,
            status_tx,
            output_rate,
            queued: None,
            active: None,
        }
    }

    fn interrupt_queued(&mut self) {
        if let Some(voice) = self.queued.take() {
            let _ = self.status_tx.push(Status::Interrupted(voice.id));
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(voice) = self.voices_rx.pop() {
            self.interrupt_queued();
            self.queued = Some(voice);
        }

        while let Ok(cmd) = self.command_rx.pop() {
            match cmd {
                Command::Play { voice, gain } => {
                    if self.queued.as_ref().is_some_and(|q| q.id == voice) {
                        if let Some(QueuedVoice { id, audio }) = self.queued.take() {
                            let step = audio.sample_rate() as f64 / self.output_rate as f64;
                            self.active = Some(ActiveVoice {
                                id,
                                audio,
                                gain,
                                position: 0.0,
                                step,
                            });
                            let _ = self.status_tx.push(Status::Started(id));
                        }
                    }
                }
                Command::Stop { voice } => {
                    if self.queued.as_ref().is_some_and(|q| q.id == voice) {
                        self.interrupt_queued();
                    }
                    if self.active.as_ref().is_some_and(|a| a.id == voice) {
                        self.active = None;
                    }
                }
                Command::SetGain { voice, gain } => {
                    if let Some(active) = self.active.as_mut().filter(|a| a.id == voice) {
                        active.gain = gain;
                    }
                }
            }
        }
    }

    pub fn render<T>(&mut self, data: &mut [T], output_channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        self.drain_messages();

        for frame in data.chunks_mut(output_channels) {
            let Some(voice) = self.active.as_mut() else {
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(0.0);
                }
                continue;
            };

            let source = voice.audio.frame(voice.position as usize);
            if source.is_empty() {
                let _ = self.status_tx.push(Status::Finished(voice.id));
                self.active = None;
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(0.0);
                }
                continue;
            }

            // Fewer source channels than outputs wrap around, so mono feeds both sides
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = T::from_sample(source[ch % source.len()] * voice.gain);
            }

            voice.position += voice.step;
        }
    }
}
