//! Fixed-capacity byte accumulator used for exec stdout/stderr and file reads.

/// An append-only byte buffer that silently stops accepting bytes once it
/// would exceed `limit`, recording that it was truncated.
///
/// Decoding to UTF-8 tolerates an incomplete trailing multi-byte sequence
/// only when the buffer was truncated (the sequence may simply have been cut
/// off mid-stream); otherwise a decode failure is a real error.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    limit: usize,
    data: Vec<u8>,
    truncated: bool,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::new(),
            truncated: false,
        }
    }

    /// Appends `chunk`, truncating (and marking truncated) if it would
    /// overflow the limit. Returns `true` if this call caused truncation.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.truncated {
            return false;
        }
        let remaining = self.limit.saturating_sub(self.data.len());
        if chunk.len() <= remaining {
            self.data.extend_from_slice(chunk);
            false
        } else {
            self.data.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
            true
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Decodes the accumulated bytes as UTF-8. When truncated, a trailing
    /// incomplete sequence is dropped rather than treated as an error.
    pub fn into_string_lossy_on_truncation(self) -> Result<String, std::string::FromUtf8Error> {
        if !self.truncated {
            return String::from_utf8(self.data);
        }
        match String::from_utf8(self.data.clone()) {
            Ok(s) => Ok(s),
            Err(_) => {
                // Walk back to the last valid UTF-8 boundary.
                let mut end = self.data.len();
                while end > 0 && std::str::from_utf8(&self.data[..end]).is_err() {
                    end -= 1;
                }
                Ok(String::from_utf8_lossy(&self.data[..end]).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bytes_under_limit() {
        let mut buf = BoundedBuffer::new(10);
        assert!(!buf.push(b"hello"));
        assert_eq!(buf.as_bytes(), b"hello");
        assert!(!buf.truncated());
    }

    #[test]
    fn truncates_on_overflow() {
        let mut buf = BoundedBuffer::new(5);
        assert!(buf.push(b"hello world"));
        assert_eq!(buf.as_bytes(), b"hello");
        assert!(buf.truncated());
    }

    #[test]
    fn ignores_further_pushes_once_truncated() {
        let mut buf = BoundedBuffer::new(3);
        assert!(buf.push(b"abcdef"));
        assert!(!buf.push(b"ghij"));
        assert_eq!(buf.as_bytes(), b"abc");
    }

    #[test]
    fn tolerates_incomplete_trailing_sequence_when_truncated() {
        let mut buf = BoundedBuffer::new(4);
        // "héllo" -> 'h', 0xC3, 0xA9, 'l' cuts the 2-byte 'é' sequence in half.
        let bytes = "héllo".as_bytes();
        buf.push(bytes);
        assert!(buf.truncated());
        let s = buf.into_string_lossy_on_truncation().unwrap();
        assert_eq!(s, "h");
    }

    #[test]
    fn propagates_decode_error_when_not_truncated() {
        let mut buf = BoundedBuffer::new(10);
        buf.push(&[0xff, 0xfe]);
        assert!(buf.into_string_lossy_on_truncation().is_err());
    }
}
