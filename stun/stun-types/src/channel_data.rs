use crate::{padding, Error, NE};
use byteorder::ReadBytesExt;
use bytes::BufMut;

/// Lowest valid channel number (RFC 5766 section 11)
pub const CHANNEL_MIN: u16 = 0x4000;

/// Highest valid channel number
pub const CHANNEL_MAX: u16 = 0x7FFF;

/// A ChannelData message aliasing a peer with a 16 bit channel number
///
/// Over UDP the frame is exactly `4 + data.len()` bytes. Over stream
/// transports it is padded with up to 3 zero bytes to a 4 byte boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelData<'d> {
    pub number: u16,
    pub data: &'d [u8],
}

impl<'d> ChannelData<'d> {
    pub fn parse(mut frame: &'d [u8]) -> Result<Self, Error> {
        let header = &mut frame;

        let number = header.read_u16::<NE>()?;
        let len = usize::from(header.read_u16::<NE>()?);

        if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&number) {
            return Err(Error::InvalidData("channel number out of range"));
        }

        if frame.len() < len {
            return Err(Error::InvalidData("channel data frame truncated"));
        }

        Ok(Self {
            number,
            data: &frame[..len],
        })
    }

    pub fn encode(&self, pad: bool) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(4 + self.data.len() + 3);

        buffer.put_u16(self.number);
        buffer.put_u16(self.data.len() as u16);
        buffer.extend_from_slice(self.data);

        if pad {
            buffer.extend(std::iter::repeat_n(0, padding(self.data.len())));
        }

        buffer
    }

    /// Total frame length (including padding for stream transports)
    /// given the 4 byte header of a frame
    pub fn framed_len(header: [u8; 4], pad: bool) -> usize {
        let len = usize::from(u16::from_be_bytes([header[2], header[3]]));

        if pad {
            4 + len + padding(len)
        } else {
            4 + len
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn padded_to_boundary() {
        let data = ChannelData {
            number: 0x4000,
            data: b"hello",
        };

        let wire = data.encode(true);
        assert_eq!(wire.len(), 12);
        assert_eq!(&wire[..4], &[0x40, 0x00, 0x00, 0x05]);

        let parsed = ChannelData::parse(&wire).unwrap();
        assert_eq!(parsed.number, 0x4000);
        assert_eq!(parsed.data, b"hello");
    }

    #[test]
    fn unpadded_on_datagrams() {
        let data = ChannelData {
            number: 0x7FFF,
            data: b"abc",
        };

        assert_eq!(data.encode(false).len(), 7);
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        let wire = ChannelData {
            number: 0x4000,
            data: b"x",
        }
        .encode(false);

        let mut bad = wire.clone();
        bad[0] = 0x3F;
        assert!(ChannelData::parse(&bad).is_err());
    }
}
