use crate::attr::Attr;
use crate::header::{Class, MessageHead, StunMethod, STUN_HEADER_LENGTH};
use crate::{padding, Error, TransactionId, COOKIE};
use bytes::BufMut;

/// Writer for a STUN message
pub struct MessageWriter {
    head: MessageHead,
    transaction_id: TransactionId,

    buffer: Vec<u8>,
}

impl MessageWriter {
    pub fn new(class: Class, method: StunMethod, transaction_id: TransactionId) -> Self {
        let mut buffer = Vec::new();

        let mut typ = 0;
        method.set_bits(&mut typ);
        class.set_bits(&mut typ);

        let mut head = MessageHead(0);
        head.set_typ(typ);
        buffer.put_u32(head.0);

        buffer.put_u32(COOKIE);
        buffer.put_slice(&transaction_id.0);

        Self {
            head,
            transaction_id,
            buffer,
        }
    }

    /// Set the length field of the message header
    pub fn set_len(&mut self, len: u16) {
        self.head.set_len(len);

        let [b0, b1, b2, b3] = u32::to_be_bytes(self.head.0);

        self.buffer[0] = b0;
        self.buffer[1] = b1;
        self.buffer[2] = b2;
        self.buffer[3] = b3;
    }

    /// Serialize the attribute into the message
    pub fn add_attr<'a, A>(&mut self, attr: A) -> Result<(), Error>
    where
        A: Attr<'a, Context = ()>,
    {
        self.add_attr_with(attr, ())
    }

    /// Serialize the attribute into the message with a given context
    /// (e.g. a key to calculate the integrity)
    pub fn add_attr_with<'a, A>(&mut self, attr: A, ctx: A::Context) -> Result<(), Error>
    where
        A: Attr<'a>,
    {
        let enc_len = attr.encode_len()?;

        self.buffer.put_u16(A::TYPE);
        self.buffer.put_u16(enc_len);

        attr.encode(ctx, self);

        self.buffer
            .extend(std::iter::repeat_n(0, padding(usize::from(enc_len))));

        Ok(())
    }

    pub(crate) fn id(&self) -> u128 {
        let cookie = COOKIE.to_be_bytes();
        let tsx = self.transaction_id.0;

        let mut id = [0u8; 16];

        id[..4].copy_from_slice(&cookie);
        id[4..].copy_from_slice(&tsx);

        u128::from_be_bytes(id)
    }

    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buffer.len() - STUN_HEADER_LENGTH;
        self.set_len(len.try_into().expect("stun message larger than u16::MAX"));
        self.buffer
    }

    pub fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}
