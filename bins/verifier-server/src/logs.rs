/// Stream Demultiplexer - splits a container's framed output into stdout
/// and stderr.
///
/// **Wire format (Docker attach/logs, non-tty):**
/// Each frame is an 8 byte header followed by its payload:
/// - byte 0: stream type (0 stdin, 1 stdout, 2 stderr)
/// - bytes 1-3: reserved
/// - bytes 4-7: payload length, big-endian u32
///
/// Stdin frames are folded into stdout, as the engine never emits them
/// for a sandbox without an attached stdin.
///
/// **Failure rules:**
/// - Clean end of stream before a header: done
/// - End of stream inside a header or payload: error, never a partial result
/// - Unknown stream type: error
/// - Declared length beyond the caller's buffer limit: error, before reading it

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StreamType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Demultiplexed output of one sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStreams {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl LogStreams {
    fn target(&mut self, stream: StreamType) -> &mut Vec<u8> {
        match stream {
            StreamType::Stdin | StreamType::Stdout => &mut self.stdout,
            StreamType::Stderr => &mut self.stderr,
        }
    }

    fn buffered(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Log stream ended inside a frame header ({read} of 8 bytes)")]
    TruncatedHeader { read: usize },

    #[error("Log stream ended inside a frame payload ({read} of {expected} bytes)")]
    TruncatedPayload { read: usize, expected: usize },

    #[error("Wrong stream type: {tag}")]
    UnknownStream { tag: u8 },

    #[error("Frame of {size} bytes would exceed the {limit} byte log limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Failed to read log stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a framed stream to its end.
///
/// ## Arguments
/// * `reader` - Raw multiplexed stream, as returned by `EngineClient::logs`
/// * `limit` - Maximum number of payload bytes buffered across both channels
pub async fn demux<R>(mut reader: R, limit: usize) -> Result<LogStreams, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut streams = LogStreams::default();
    let mut header = [0u8; HEADER_SIZE];

    loop {
        let read = read_full(&mut reader, &mut header).await?;
        if read == 0 {
            break;
        }
        if read < HEADER_SIZE {
            return Err(FrameError::TruncatedHeader { read });
        }

        let stream =
            StreamType::from_tag(header[0]).ok_or(FrameError::UnknownStream { tag: header[0] })?;
        let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        if size > limit.saturating_sub(streams.buffered()) {
            return Err(FrameError::TooLarge { size, limit });
        }

        // take() lets the buffer grow with the bytes actually received
        // instead of trusting the declared length up front.
        let target = streams.target(stream);
        let read = (&mut reader).take(size as u64).read_to_end(target).await?;
        if read < size {
            return Err(FrameError::TruncatedPayload {
                read,
                expected: size,
            });
        }
    }

    Ok(streams)
}

/// Encode a payload as frames of the given stream type. An empty payload yields no frame.
pub fn encode_frame(stream: StreamType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    for chunk in payload.chunks(u32::MAX as usize) {
        buf.put_u8(stream as u8);
        buf.put_bytes(0, 3);
        buf.put_u32(chunk.len() as u32);
        buf.put_slice(chunk);
    }
    buf.freeze()
}

/// Fill `buf` unless the stream ends first; returns the bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
