use crate::proto::BLOCK_SIZE;

/// The part of one block touched by a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Index of the block within the file.
    pub index: usize,
    /// First byte within the block.
    pub offset: usize,
    pub len: usize,
}

impl BlockSpan {
    /// Whether the span covers the entire block.
    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.len == BLOCK_SIZE
    }

    pub fn range(&self) -> core::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Splits the byte range `[start, start + len)` into per-block spans.
pub struct BlockSpans {
    cursor: u64,
    remaining: u64,
}

impl BlockSpans {
    pub fn new(start: u64, len: usize) -> Self {
        Self {
            cursor: start,
            remaining: len as u64,
        }
    }
}

impl Iterator for BlockSpans {
    type Item = BlockSpan;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let bs = BLOCK_SIZE as u64;
        let index = (self.cursor / bs) as usize;
        let offset = (self.cursor % bs) as usize;
        let take = self.remaining.min((BLOCK_SIZE - offset) as u64) as usize;

        self.cursor += take as u64;
        self.remaining -= take as u64;

        Some(BlockSpan { index, offset, len: take })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(start: u64, len: usize) -> Vec<BlockSpan> {
        BlockSpans::new(start, len).collect()
    }

    #[test]
    fn empty_range() {
        assert!(spans(100, 0).is_empty());
    }

    #[test]
    fn inside_one_block() {
        assert_eq!(spans(100, 50), vec![BlockSpan { index: 0, offset: 100, len: 50 }]);
    }

    #[test]
    fn exactly_one_block() {
        let s = spans(1024, 1024);
        assert_eq!(s, vec![BlockSpan { index: 1, offset: 0, len: 1024 }]);
        assert!(s[0].is_full());
    }

    #[test]
    fn crosses_blocks() {
        assert_eq!(
            spans(1000, 2100),
            vec![
                BlockSpan { index: 0, offset: 1000, len: 24 },
                BlockSpan { index: 1, offset: 0, len: 1024 },
                BlockSpan { index: 2, offset: 0, len: 1024 },
                BlockSpan { index: 3, offset: 0, len: 28 },
            ]
        );
    }

    #[test]
    fn ends_on_boundary() {
        let s = spans(512, 512);
        assert_eq!(s, vec![BlockSpan { index: 0, offset: 512, len: 512 }]);
        assert!(!s[0].is_full());
        assert_eq!(s[0].range(), 512..1024);
    }
}
