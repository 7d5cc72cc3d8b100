use std::sync::Arc;

use thiserror::Error;

/// All possible errors that can occur while decoding, previewing or trimming audio
///
/// The enum is `Clone` so that a single waveform outcome can be handed to
/// every caller waiting on the same in-flight decode.
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    /// Failed to open or read the audio file from disk
    #[error("Failed to open audio source '{path}': {source}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The container has no track with an audio codec
    #[error("No audio track found in '{0}'")]
    NoAudioTrackFound(String),

    /// The container or codec is not supported by symphonia
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Error occurred while demuxing or decoding the audio data
    #[error("Audio decoding failed: {0}")]
    DecodeFailed(String),

    /// The decoder kept producing nothing for too many consecutive packets
    #[error("Decoder stalled after {polls} consecutive empty packets")]
    DecodeStalled { polls: usize },

    /// Error occurred while writing PCM output
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    /// The transcoding engine failed; `diagnostics` holds its output
    #[error("Transcode failed: {message}\n{diagnostics}")]
    TranscodeFailed {
        message: String,
        diagnostics: String,
    },

    /// Selection violates ordering, bounds or the minimum width
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// The player could not be loaded or driven
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl AudioError {
    pub(crate) fn unreadable(path: impl Into<String>, source: std::io::Error) -> Self {
        AudioError::SourceUnreadable {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn transcode(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        AudioError::TranscodeFailed {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Io(Arc::new(err))
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => AudioError::Io(Arc::new(e)),
            other => AudioError::EncodeFailed(other.to_string()),
        }
    }
}

/// Convenient Result type that uses our AudioError
pub type Result<T> = std::result::Result<T, AudioError>;
