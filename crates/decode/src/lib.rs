pub mod codec;

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use padbank_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Media type used when a file's type cannot be guessed.
const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not a base64 data URL")]
    NotDataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// An audio file picked by the user, held in memory.
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
    /// Where the bytes were read from, if they came from disk.
    pub source: Option<PathBuf>,
}

impl AudioFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
            source: None,
        }
    }

    /// Read a file from disk, guessing its media type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            media_type: guess_media_type(path).to_string(),
            bytes,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Encode the file as a self-describing `data:<type>;base64,` URL.
    pub fn to_data_url(&self) -> String {
        to_data_url(&self.bytes, &self.media_type)
    }

    /// A transient reference a player can use to find this file again.
    pub fn playable_url(&self) -> String {
        match &self.source {
            Some(path) => format!("file://{}", path.display()),
            None => format!("memory:{}", self.name),
        }
    }
}

/// Guess an audio media type from a file extension.
pub fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        _ => FALLBACK_MEDIA_TYPE,
    }
}

pub fn to_data_url(bytes: &[u8], media_type: &str) -> String {
    let media_type = if media_type.is_empty() {
        FALLBACK_MEDIA_TYPE
    } else {
        media_type
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{media_type};base64,{encoded}")
}

/// Extract the raw bytes of a base64 data URL.
pub fn data_url_bytes(url: &str) -> Result<Vec<u8>, PayloadError> {
    let (header, payload) = url
        .strip_prefix(codec::DATA_MARKER)
        .and_then(|rest| rest.split_once(','))
        .ok_or(PayloadError::NotDataUrl)?;

    if !header.ends_with(";base64") {
        return Err(PayloadError::NotDataUrl);
    }

    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

/// Decode a stored pad payload (a data URL) into PCM.
pub fn decode_payload(url: &str) -> anyhow::Result<AudioArc> {
    let bytes = data_url_bytes(url)?;
    let mut hint = Hint::new();
    if let Some(media_type) = codec::media_type(url) {
        hint.mime_type(media_type);
    }
    decode_bytes(bytes, hint)
}

pub fn decode_file(path: &Path) -> anyhow::Result<AudioArc> {
    let bytes = std::fs::read(path)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    decode_bytes(bytes, hint)
}

fn decode_bytes(bytes: Vec<u8>, hint: Hint) -> anyhow::Result<AudioArc> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track"))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    log::debug!(
        "decoded {} samples ({} Hz, {} channels)",
        samples.len(),
        sample_rate,
        channels
    );

    Ok(AudioArc::new(samples, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn wav_bytes(frames: usize, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for i in 0..frames * channels as usize {
                writer
                    .write_sample(((i % 100) as i16 - 50) * 100)
                    .expect("write sample");
            }
            writer.finalize().expect("finalize");
        }
        cursor.into_inner()
    }

    #[test]
    fn test_to_data_url() {
        assert_eq!(to_data_url(b"abc", "audio/wav"), "data:audio/wav;base64,YWJj");
        assert_eq!(
            to_data_url(b"abc", ""),
            "data:application/octet-stream;base64,YWJj"
        );
    }

    #[test]
    fn test_data_url_bytes_roundtrip() {
        let url = to_data_url(&[0, 1, 2, 254, 255], "audio/mpeg");
        assert_eq!(data_url_bytes(&url).unwrap(), vec![0, 1, 2, 254, 255]);
    }

    #[test]
    fn test_data_url_bytes_rejects_bare_payload() {
        assert!(matches!(
            data_url_bytes("YWJj"),
            Err(PayloadError::NotDataUrl)
        ));
        assert!(matches!(
            data_url_bytes("data:audio/wav,YWJj"),
            Err(PayloadError::NotDataUrl)
        ));
    }

    #[test]
    fn test_data_url_bytes_rejects_bad_base64() {
        assert!(matches!(
            data_url_bytes("data:audio/wav;base64,!!!"),
            Err(PayloadError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_payload_wav() {
        let url = to_data_url(&wav_bytes(1000, 2), "audio/wav");
        let audio = decode_payload(&url).expect("decode");

        assert_eq!(audio.sample_rate(), 44100);
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.frames(), 1000);
    }

    #[test]
    fn test_decode_payload_garbage_fails() {
        let url = to_data_url(b"definitely not audio", "audio/mpeg");
        assert!(decode_payload(&url).is_err());
    }

    #[test]
    fn test_audio_file_from_path() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("Kick.WAV");
        std::fs::write(&path, wav_bytes(10, 1)).expect("write");

        let file = AudioFile::from_path(&path).expect("read");

        assert_eq!(file.name, "Kick.WAV");
        assert_eq!(file.media_type, "audio/wav");
        assert!(file.playable_url().starts_with("file://"));
        assert!(file.to_data_url().starts_with("data:audio/wav;base64,"));

        let audio = decode_file(&path).expect("decode");
        assert_eq!(audio.frames(), 10);
    }

    #[test]
    fn test_guess_media_type() {
        assert_eq!(guess_media_type(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(guess_media_type(Path::new("a.flac")), "audio/flac");
        assert_eq!(
            guess_media_type(Path::new("a.bin")),
            "application/octet-stream"
        );
    }
}
