use bytesstr::BytesStr;
use rand::distr::Alphanumeric;
use rand::{rng, Rng};

/// Starting CSeq for locally created dialogs.
///
/// Kept well below `u32::MAX / 2` so a dialog cannot run out of sequence
/// numbers in practice.
pub fn random_sequence_number() -> u32 {
    rng().random_range(0..0x1000_0000)
}

/// Random tag for From/To headers
pub fn generate_tag() -> BytesStr {
    random_string(12)
}

/// Random Call-ID
pub fn generate_call_id() -> BytesStr {
    random_string(24)
}

fn random_string(len: usize) -> BytesStr {
    rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .into()
}
