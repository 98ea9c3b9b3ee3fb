use bytes::Bytes;

/// Pull-style reader over a fetched manifest or chunk.
#[derive(Debug, Clone)]
pub struct ByteStream {
    data: Bytes,
    position: usize,
}

impl ByteStream {
    pub fn new<B>(data: B) -> Self
    where
        B: Into<Bytes>,
    {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns up to `len` bytes without consuming them.
    pub fn peek(&self, len: usize) -> &[u8] {
        let end = self.position.saturating_add(len).min(self.data.len());
        &self.data[self.position..end]
    }

    /// Consumes up to `len` bytes.
    pub fn read(&mut self, len: usize) -> Bytes {
        let end = self.position.saturating_add(len).min(self.data.len());
        let chunk = self.data.slice(self.position..end);
        self.position = end;
        chunk
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.position..]
    }

    /// Reads one line, accepting `\n`, `\r\n` and lone `\r` terminators.
    ///
    /// Returns `None` once the stream is exhausted. Invalid UTF-8 is replaced lossily.
    pub fn read_line(&mut self) -> Option<String> {
        if self.is_eof() {
            return None;
        }

        let rest = &self.data[self.position..];
        let (line_len, terminator_len) = match rest.iter().position(|b| *b == b'\n' || *b == b'\r')
        {
            Some(index) if rest[index] == b'\r' && rest.get(index + 1) == Some(&b'\n') => (index, 2),
            Some(index) => (index, 1),
            None => (rest.len(), 0),
        };

        let line = String::from_utf8_lossy(&rest[..line_len]).into_owned();
        self.position += line_len + terminator_len;
        Some(line)
    }
}
