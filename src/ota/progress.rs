/// How an arriving block relates to the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    /// The next expected block with the expected length.
    Accept,
    /// Already written.
    Stale,
    /// Ahead of the next expected block.
    OutOfOrder,
    /// Length does not fit the file layout.
    BadLength { expected: usize },
}

/// Bookkeeping for one file transfer. Blocks are accepted strictly in
/// order, so the state is the next expected id plus what remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub file_size: u64,
    pub block_size: usize,
    pub total_blocks: u32,
    pub blocks_remaining: u32,
    pub next_block: u32,
    pub bytes_written: u64,
    pub last_accepted: Option<u32>,
    window_end: u32,
}

impl TransferProgress {
    pub fn new(file_size: u64, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let total_blocks = u32::try_from(file_size.div_ceil(block_size as u64)).unwrap_or(u32::MAX);
        Self {
            file_size,
            block_size,
            total_blocks,
            blocks_remaining: total_blocks,
            next_block: 0,
            bytes_written: 0,
            last_accepted: None,
            window_end: 0,
        }
    }

    /// Byte offset of `block_id` in the file.
    pub fn offset(&self, block_id: u32) -> u64 {
        u64::from(block_id) * self.block_size as u64
    }

    /// Length block `block_id` must have; only the last block is short.
    pub fn expected_len(&self, block_id: u32) -> usize {
        let remaining = self.file_size.saturating_sub(self.offset(block_id));
        usize::try_from(remaining.min(self.block_size as u64)).unwrap_or(self.block_size)
    }

    pub fn check(&self, block_id: u32, len: usize) -> BlockCheck {
        if block_id < self.next_block {
            return BlockCheck::Stale;
        }
        if block_id > self.next_block || block_id >= self.total_blocks {
            return BlockCheck::OutOfOrder;
        }
        let expected = self.expected_len(block_id);
        if len != expected {
            return BlockCheck::BadLength { expected };
        }
        BlockCheck::Accept
    }

    /// Record a block that passed [`check`](Self::check) and was written.
    pub fn record(&mut self, block_id: u32, len: usize) {
        self.last_accepted = Some(block_id);
        self.next_block = block_id + 1;
        self.blocks_remaining = self.blocks_remaining.saturating_sub(1);
        self.bytes_written += len as u64;
    }

    /// Start a request window of up to `size` blocks at the next expected
    /// block. Returns `(first, count)`.
    pub fn open_window(&mut self, size: u32) -> (u32, u32) {
        let count = size.max(1).min(self.blocks_remaining);
        self.window_end = self.next_block + count;
        (self.next_block, count)
    }

    /// Every block of the current window has arrived.
    pub fn window_consumed(&self) -> bool {
        self.next_block >= self.window_end
    }

    pub fn is_complete(&self) -> bool {
        self.blocks_remaining == 0
    }

    pub fn blocks_received(&self) -> u32 {
        self.total_blocks - self.blocks_remaining
    }

    /// Progress as carried in status reports, e.g. `3/10`.
    pub fn received(&self) -> String {
        format!("{}/{}", self.blocks_received(), self.total_blocks)
    }
}
