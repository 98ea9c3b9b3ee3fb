#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Offset of the first byte after this range, if the range is bounded.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|length| self.offset.saturating_add(length))
    }

    pub fn to_http_range(&self) -> String {
        if let Some(length) = self.length {
            let last = self.offset.saturating_add(length.max(1) - 1);
            format!("bytes={}-{last}", self.offset)
        } else {
            format!("bytes={}-", self.offset)
        }
    }

    /// Applies this range to an in-memory resource.
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = (self.offset as usize).min(data.len());
        let end = self
            .end()
            .map(|end| (end as usize).clamp(start, data.len()))
            .unwrap_or(data.len());
        &data[start..end]
    }
}
