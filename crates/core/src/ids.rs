use uuid::Uuid;

/// z-base32 alphabet used for every generated identifier.
const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

pub const ID_LENGTH: usize = 26;

/// Returns a fresh 26 character identifier: a random v4 UUID encoded with
/// the z-base32 alphabet and no padding.
pub fn new_id() -> String {
    encode_base32(Uuid::new_v4().as_bytes())
}

fn encode_base32(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            encoded.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }

    if bits > 0 {
        encoded.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    encoded
}

pub fn is_valid_id(value: &str) -> bool {
    value.len() == ID_LENGTH && value.bytes().all(|byte| ALPHABET.contains(&byte))
}
