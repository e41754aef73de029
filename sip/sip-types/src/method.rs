use bytesstr::BytesStr;
use std::fmt;

/// Represents a SIP-Method.
///
/// Well known methods are available as constants:
///
/// ```
/// use lark_sip_types::Method;
///
/// let _invite = Method::INVITE;
///
/// // custom methods can also be used:
/// let _custom = Method::from("HELLO");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Method(Repr);

macro_rules! methods {
    ($($print:literal, $ident:ident;)+) => {
        #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        enum Repr {
            $($ident,)+
            Other(BytesStr),
        }

        impl Method {
            $(pub const $ident: Self = Self(Repr::$ident);)+

            /// Canonical name of the method as it appears in a CSeq header
            pub fn name(&self) -> &str {
                match &self.0 {
                    $(Repr::$ident => $print,)+
                    Repr::Other(other) => other,
                }
            }
        }

        impl From<&str> for Method {
            fn from(s: &str) -> Self {
                match s {
                    $($print => Self(Repr::$ident),)+
                    other => Self(Repr::Other(BytesStr::from(other))),
                }
            }
        }
    };
}

methods! {
    "INVITE",   INVITE;
    "ACK",      ACK;
    "CANCEL",   CANCEL;
    "BYE",      BYE;
    "REGISTER", REGISTER;
    "MESSAGE",  MESSAGE;
    "UPDATE",   UPDATE;
    "PRACK",    PRACK;
    "OPTIONS",  OPTIONS;
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn known_method() {
        assert_eq!(Method::from("INVITE"), Method::INVITE);
        assert_eq!(Method::INVITE.to_string(), "INVITE");
    }

    #[test]
    fn other_method() {
        let method = Method::from("SOMEOBSCUREMETHOD");

        assert_ne!(method, Method::INVITE);
        assert_eq!(method.to_string(), "SOMEOBSCUREMETHOD");
    }
}
