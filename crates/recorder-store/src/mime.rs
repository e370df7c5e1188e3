//! MIME ↔ file extension mapping for the media types the recorder meets.
//!
//! Capture devices report parameterized types such as
//! `audio/webm;codecs=opus`; only the essence decides the extension.

/// Strip parameters and normalize case.
fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// File extension for a MIME type, `None` when unknown.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match essence(mime).as_str() {
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "video/mp4" => "mp4",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/aac" => "aac",
        "video/x-matroska" => "mkv",
        "video/quicktime" => "mov",
        _ => return None,
    };
    Some(ext)
}

/// Best-guess MIME type for a file extension, `None` when unknown.
///
/// `webm` maps to the audio essence since that is what capture devices in
/// this system produce; the container is identical either way.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "webm" | "weba" => "audio/webm",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_ignores_codec_parameters() {
        assert_eq!(extension_for_mime("audio/webm;codecs=opus"), Some("webm"));
        assert_eq!(extension_for_mime("AUDIO/OGG; codecs=vorbis"), Some("ogg"));
    }

    #[test]
    fn unknown_mime_has_no_extension() {
        assert_eq!(extension_for_mime("application/x-unknown"), None);
    }

    #[test]
    fn extension_guess_roundtrips_for_common_types() {
        for ext in ["webm", "ogg", "mp3", "wav", "flac"] {
            let mime = mime_for_extension(ext).unwrap();
            assert_eq!(extension_for_mime(mime), Some(ext));
        }
    }
}
