use crate::constants::{DEFAULT_IGNORE_CHUNK_LEN, DEFAULT_STREAM_READ_LEN};

use derivative::Derivative;

/// Configuration for tokenizers and container walkers.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// Maximum number of bytes drained by a single read when a stream source
    /// is asked to ignore data.
    ///
    /// Streams cannot seek, so skipped regions are read into a scratch buffer of
    /// this size and thrown away.
    ///
    /// Defaults to 64kiB.
    pub ignore_chunk_len: usize,

    /// Minimum number of bytes pulled from a stream source whenever the peek
    /// buffer must be refilled.
    ///
    /// Defaults to 4kiB.
    pub stream_read_len: usize,

    /// Configures whether an Ogg page which starts a new packet while the previous
    /// packet of the same logical stream is incomplete is a hard error.
    ///
    /// When disabled, the incomplete packet is dropped and a warning is logged.
    ///
    /// Defaults to `false`.
    pub strict_ogg_continuity: bool,

    /// Configures whether bytes left unread inside a chunk, and skipped by the
    /// walker, are reported as warnings.
    ///
    /// Many encoders misstate payload sizes by a few bytes, so this is noisy
    /// on real-world files.
    ///
    /// Defaults to `true`.
    pub warn_on_leftover: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_chunk_len: DEFAULT_IGNORE_CHUNK_LEN,
            stream_read_len: DEFAULT_STREAM_READ_LEN,
            strict_ogg_continuity: false,
            warn_on_leftover: true,
        }
    }
}

impl Config {
    /// Sets this `Config`'s chunk length for draining ignored stream data.
    ///
    /// Values of zero are raised to one byte.
    #[must_use]
    pub fn ignore_chunk_len(mut self, ignore_chunk_len: usize) -> Self {
        self.ignore_chunk_len = ignore_chunk_len.max(1);
        self
    }

    /// Sets this `Config`'s minimum stream refill length.
    ///
    /// Values of zero are raised to one byte.
    #[must_use]
    pub fn stream_read_len(mut self, stream_read_len: usize) -> Self {
        self.stream_read_len = stream_read_len.max(1);
        self
    }

    /// Sets whether Ogg continuity violations are fatal.
    #[must_use]
    pub fn strict_ogg_continuity(mut self, strict_ogg_continuity: bool) -> Self {
        self.strict_ogg_continuity = strict_ogg_continuity;
        self
    }

    /// Sets whether skipped chunk leftovers are logged as warnings.
    #[must_use]
    pub fn warn_on_leftover(mut self, warn_on_leftover: bool) -> Self {
        self.warn_on_leftover = warn_on_leftover;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_lengths_are_clamped() {
        let cfg = Config::default().ignore_chunk_len(0).stream_read_len(0);
        assert_eq!(cfg.ignore_chunk_len, 1);
        assert_eq!(cfg.stream_read_len, 1);
    }
}
