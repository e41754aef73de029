use super::{Attr, ATTRIBUTE_HEADER_LEN};
use crate::header::STUN_HEADER_LENGTH;
use crate::parse::{AttrSpan, Message};
use crate::write::MessageWriter;
use crate::Error;
use hmac::digest::Update;
use hmac::{Mac, SimpleHmac};
use sha1::{Digest, Sha1};

/// Long-term credential key, `MD5(username ":" realm ":" password)`
/// per RFC 8489 section 9.2.2
pub fn long_term_key(username: &str, realm: &str, password: &str) -> Vec<u8> {
    md5::compute(format!("{username}:{realm}:{password}").as_bytes()).to_vec()
}

#[derive(Clone)]
pub struct MessageIntegrityKey(SimpleHmac<Sha1>);

impl MessageIntegrityKey {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self(SimpleHmac::new_from_slice(key.as_ref()).expect("any key length is valid"))
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.5)
///
/// The HMAC input is the message up to (but excluding) this attribute,
/// with the header's length field patched to point past it.
pub struct MessageIntegrity;

impl Attr<'_> for MessageIntegrity {
    type Context = MessageIntegrityKey;
    const TYPE: u16 = 0x0008;

    fn decode(ctx: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        let mut hmac = ctx.0;

        msg.with_msg_len(
            u16::try_from(attr.padding_end - STUN_HEADER_LENGTH)?,
            |msg| {
                let received_digest = attr.get_value(msg.buffer()).to_vec();

                let covered = &msg.buffer()[..attr.begin - ATTRIBUTE_HEADER_LEN];
                Update::update(&mut hmac, covered);

                // constant-time comparison
                hmac.verify_slice(&received_digest)
                    .map_err(|_| Error::InvalidData("failed to verify message integrity"))
            },
        )?;

        Ok(Self)
    }

    fn encode(&self, ctx: Self::Context, writer: &mut MessageWriter) {
        let mut hmac = ctx.0;

        // patch the length as if this attribute was the last one
        let msg_len_with_integrity =
            (writer.buffer().len() + Sha1::output_size()) - STUN_HEADER_LENGTH;

        writer.set_len(
            msg_len_with_integrity
                .try_into()
                .expect("stun message larger than u16::MAX"),
        );

        let data = writer.buffer();
        let data = &data[..data.len() - ATTRIBUTE_HEADER_LEN];
        Update::update(&mut hmac, data);
        let digest = hmac.finalize().into_bytes();

        writer.buffer().extend_from_slice(&digest);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(Sha1::output_size())?)
    }
}

#[cfg(test)]
mod test {
    use super::{long_term_key, MessageIntegrity, MessageIntegrityKey};
    use crate::attr::Software;
    use crate::header::{Class, StunMethod};
    use crate::{Message, MessageWriter, TransactionId};

    #[test]
    fn integrity_roundtrip() {
        let key = long_term_key("alice", "lark", "hunter2");

        let mut writer = MessageWriter::new(
            Class::Request,
            StunMethod::Allocate,
            TransactionId::random(),
        );

        writer.add_attr(Software::new("lark-stun")).unwrap();
        writer
            .add_attr_with(MessageIntegrity, MessageIntegrityKey::new(&key))
            .unwrap();

        let bytes = writer.finish();

        let mut msg = Message::parse(bytes).unwrap();

        msg.attribute_with::<MessageIntegrity>(MessageIntegrityKey::new(&key))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn integrity_rejects_wrong_key() {
        let mut writer = MessageWriter::new(
            Class::Request,
            StunMethod::Allocate,
            TransactionId::random(),
        );

        writer
            .add_attr_with(
                MessageIntegrity,
                MessageIntegrityKey::new(long_term_key("alice", "lark", "hunter2")),
            )
            .unwrap();

        let bytes = writer.finish();

        let mut msg = Message::parse(bytes).unwrap();

        let verified = msg
            .attribute_with::<MessageIntegrity>(MessageIntegrityKey::new(long_term_key(
                "alice", "lark", "wrong",
            )))
            .unwrap();

        assert!(verified.is_err());
    }
}
