//! Error types for the streaming pipeline and session layer.

/// Errors that can occur across the pipeline and session layer.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`ConfigureRejected`](Self::ConfigureRejected) —
///   double configure, producer setup failure, or a codec that refused
///   the requested parameters.
/// - **Encoder**: [`EncoderEndOfStream`](Self::EncoderEndOfStream),
///   [`EncoderNotConnected`](Self::EncoderNotConnected),
///   [`EncoderTransientRead`](Self::EncoderTransientRead).
/// - **Packetizer**: [`UnsupportedTrackFormat`](Self::UnsupportedTrackFormat),
///   [`StreamIdsExhausted`](Self::StreamIdsExhausted),
///   [`InvalidTrack`](Self::InvalidTrack),
///   [`PacketizeFailed`](Self::PacketizeFailed).
/// - **Transport**: [`Io`](Self::Io),
///   [`NetworkWriteFailed`](Self::NetworkWriteFailed),
///   [`RemoteClosed`](Self::RemoteClosed).
/// - **Lifecycle**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotRunning`](Self::NotRunning),
///   [`PipelineFull`](Self::PipelineFull).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration was rejected, or a component was configured twice.
    #[error("configuration rejected: {0}")]
    ConfigureRejected(&'static str),

    /// The encoder's input source signalled that no more frames will arrive.
    #[error("encoder reached end of stream")]
    EncoderEndOfStream,

    /// The codec asked for input while the encoder stage was not running.
    #[error("encoder source is not connected")]
    EncoderNotConnected,

    /// A single read from the encoder's input source failed.
    #[error("encoder input read failed")]
    EncoderTransientRead,

    /// The packetizer only handles H.264 video tracks.
    #[error("unsupported track format: {0}")]
    UnsupportedTrackFormat(String),

    /// All PES stream ids (0xE0..=0xEF) are in use.
    #[error("all PES stream ids are in use")]
    StreamIdsExhausted,

    /// A track id that was never handed out by `add_track`.
    #[error("invalid track index {0}")]
    InvalidTrack(usize),

    /// An access unit could not be packetized; the caller drops it and
    /// the pipeline continues.
    #[error("packetizing failed: {0}")]
    PacketizeFailed(&'static str),

    /// A datagram write failed with a local network error.
    #[error("network write failed")]
    NetworkWriteFailed,

    /// The remote end closed the connection.
    #[error("remote closed the connection")]
    RemoteClosed,

    /// Start was called on a component that is already running.
    #[error("already running")]
    AlreadyRunning,

    /// An operation that requires a running component found it stopped.
    #[error("not running")]
    NotRunning,

    /// The pipeline's fixed capacity is exhausted.
    #[error("pipeline capacity ({0}) exhausted")]
    PipelineFull(usize),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
