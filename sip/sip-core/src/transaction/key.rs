use sha1::{Digest, Sha1};
use sip_types::{Method, Request, Response};
use std::fmt;

/// Transaction id, used to match a message to an ongoing transaction.
///
/// Computed as `SHA1(top_via_branch ‖ cseq_method_name)`. ACK requests
/// hash the INVITE method name so an ACK for a non-2xx final response
/// lands on the transaction of its INVITE.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TsxId([u8; 20]);

impl TsxId {
    pub fn compute(branch: &str, method: &Method) -> Self {
        let method = if *method == Method::ACK {
            &Method::INVITE
        } else {
            method
        };

        let mut sha1 = Sha1::new();
        sha1.update(branch.as_bytes());
        sha1.update(method.name().as_bytes());

        Self(sha1.finalize().into())
    }

    /// Id a request belongs to. `None` if the top Via carries no branch.
    pub fn of_request(request: &Request) -> Option<Self> {
        let branch = request.top_via_branch().filter(|b| !b.is_empty())?;

        Some(Self::compute(branch, &request.cseq.method))
    }

    /// Id a response belongs to. `None` if the top Via carries no branch.
    pub fn of_response(response: &Response) -> Option<Self> {
        let branch = response.top_via_branch().filter(|b| !b.is_empty())?;

        Some(Self::compute(branch, &response.cseq.method))
    }
}

impl fmt::Display for TsxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn differs_by_branch_and_method() {
        let a = TsxId::compute("z9hG4bK-A", &Method::INVITE);
        let b = TsxId::compute("z9hG4bK-B", &Method::INVITE);
        let c = TsxId::compute("z9hG4bK-A", &Method::BYE);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn ack_hashes_like_invite() {
        assert_eq!(
            TsxId::compute("z9hG4bK-A", &Method::ACK),
            TsxId::compute("z9hG4bK-A", &Method::INVITE),
        );
    }

    #[test]
    fn cancel_is_its_own_transaction() {
        assert_ne!(
            TsxId::compute("z9hG4bK-A", &Method::CANCEL),
            TsxId::compute("z9hG4bK-A", &Method::INVITE),
        );
    }
}
