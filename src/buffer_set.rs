//! Buffer set for state machine operations.

/// Buffer set for state machine operations.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last logical packet read (multi-packet messages reassembled)
    pub read_buffer: Vec<u8>,
    /// Framed packets to be written (headers included)
    pub write_buffer: Vec<u8>,
    /// Column definition packets of the current result set, each prefixed by its u32-LE length
    pub column_buffer: Vec<u8>,
    /// Sequence id of the next packet, shared by both directions within a command
    pub sequence_id: u8,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            column_buffer: Vec::with_capacity(512),
            sequence_id: 0,
        }
    }

    /// Prepare for a new command: sequence id restarts at 0.
    pub fn start_command(&mut self) {
        self.write_buffer.clear();
        self.sequence_id = 0;
    }

    /// Total heap capacity held by the buffers.
    pub fn capacity(&self) -> usize {
        self.read_buffer.capacity() + self.write_buffer.capacity() + self.column_buffer.capacity()
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
