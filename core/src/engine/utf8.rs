/// Decodes PTY reads, carrying a multi-byte sequence that was split across
/// reads over to the next one. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut decoded = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    self.carry.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.carry[..valid_up_to]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.carry.drain(..valid_up_to);
                            break;
                        }
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid_up_to + invalid_len);
                        }
                    }
                }
            }
        }
        decoded
    }

    /// Whatever is still carried at end-of-stream, lossily.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        rest
    }
}
