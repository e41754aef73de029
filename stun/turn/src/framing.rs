use stun_types::{ChannelData, FrameKind, STUN_HEADER_LENGTH};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A complete message read from a framed TCP control stream
#[derive(Debug)]
pub(crate) enum Frame {
    Stun(Vec<u8>),
    ChannelData(Vec<u8>),
}

/// Read one length-delimited message off a TURN TCP control stream.
///
/// The 4 byte header decides the framing: `01` in the two top bits means
/// ChannelData (2 byte channel, 2 byte length, padded to 4 bytes),
/// anything else is a STUN message of `20 + attributes_length` bytes.
pub(crate) async fn read_frame<R>(stream: &mut R) -> std::io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    match FrameKind::of(&header) {
        FrameKind::ChannelData => {
            let total = ChannelData::framed_len(header, true);

            let mut frame = vec![0u8; total];
            frame[..4].copy_from_slice(&header);
            stream.read_exact(&mut frame[4..]).await?;

            Ok(Frame::ChannelData(frame))
        }
        _ => {
            // byte 2 and 3 of the header carry the attributes length
            let attributes_len = usize::from(u16::from_be_bytes([header[2], header[3]]));
            let total = STUN_HEADER_LENGTH + attributes_len;

            let mut frame = vec![0u8; total];
            frame[..4].copy_from_slice(&header);
            stream.read_exact(&mut frame[4..]).await?;

            Ok(Frame::Stun(frame))
        }
    }
}
