// Byte-level BPE alphabet: every byte value gets a printable stand-in character
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub struct ByteLevelCodec {
    byte_to_char: [char; 256],
    char_to_byte: HashMap<char, u8>,
}

static CODEC: Lazy<ByteLevelCodec> = Lazy::new(ByteLevelCodec::build);

impl ByteLevelCodec {
    /// The process-wide table; identical on every build.
    pub fn shared() -> &'static ByteLevelCodec {
        &CODEC
    }

    fn build() -> Self {
        let mut byte_to_char = ['\0'; 256];
        let mut char_to_byte = HashMap::with_capacity(256);
        let mut next_extra: u32 = 256;

        for byte in 0..=255u8 {
            let code = if is_direct(byte) {
                byte as u32
            } else {
                let code = next_extra;
                next_extra += 1;
                code
            };
            // 0..=323 are all valid scalar values
            let ch = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
            byte_to_char[byte as usize] = ch;
            char_to_byte.insert(ch, byte);
        }

        Self { byte_to_char, char_to_byte }
    }

    pub fn encode_byte(&self, byte: u8) -> char {
        self.byte_to_char[byte as usize]
    }

    pub fn decode_char(&self, ch: char) -> Option<u8> {
        self.char_to_byte.get(&ch).copied()
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| self.encode_byte(b)).collect()
    }

    /// Reverses the mapping; characters outside the alphabet pass through as UTF-8.
    pub fn decode(&self, text: &str) -> String {
        let mut bytes = Vec::with_capacity(text.len());
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            match self.decode_char(ch) {
                Some(byte) => bytes.push(byte),
                None => bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes()),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn is_direct(byte: u8) -> bool {
    matches!(byte, 33..=126 | 161..=172 | 174..=255)
}
