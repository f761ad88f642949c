//! Conversion between self-describing audio data URLs and the bare base64
//! payload kept in storage.
//!
//! A data URL looks like `data:audio/wav;base64,UklGR...`. Storage only keeps
//! the part after the first comma. `decode` puts a prefix back, defaulting to
//! `audio/mpeg`.

/// Marks a payload that carries its own audio media type.
pub const AUDIO_MARKER: &str = "data:audio";

/// Any data URL, audio or not.
pub const DATA_MARKER: &str = "data:";

pub const DEFAULT_MEDIA_TYPE: &str = "audio/mpeg";

/// Strip the `data:audio/...;base64,` prefix, leaving the bare payload.
///
/// Inputs without the audio marker are returned unchanged.
pub fn encode(raw: &str) -> String {
    if raw.starts_with(AUDIO_MARKER) {
        match raw.split_once(',') {
            Some((_, payload)) => payload.to_string(),
            // Marker without a delimiter has no payload to keep
            None => String::new(),
        }
    } else {
        raw.to_string()
    }
}

/// Re-attach the default `data:audio/mpeg;base64,` prefix to a bare payload.
///
/// Inputs that already start with `data:` are returned unchanged.
pub fn decode(encoded: &str) -> String {
    decode_as(encoded, DEFAULT_MEDIA_TYPE)
}

/// Like [`decode`], but re-attaches `media_type` instead of the default.
pub fn decode_as(encoded: &str, media_type: &str) -> String {
    if encoded.starts_with(DATA_MARKER) {
        encoded.to_string()
    } else {
        format!("data:{media_type};base64,{encoded}")
    }
}

/// Media type of a data URL, e.g. `audio/wav` for `data:audio/wav;base64,...`.
pub fn media_type(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix(DATA_MARKER)?;
    let header = rest.split(',').next()?;
    let media_type = header.split(';').next()?;
    (!media_type.is_empty()).then_some(media_type)
}
