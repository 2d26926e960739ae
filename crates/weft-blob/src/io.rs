//! Source and target blob I/O abstractions.

use weft_core::message::{MessageId, Priority};

/// Metadata about a blob handed to target I/O callbacks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobInfo {
    /// Total size of the blob in bytes.
    pub total_size: u64,
    /// Priority the blob is transferred with.
    pub priority: Priority,
}

/// Random-access data source feeding an outgoing blob.
///
/// Each transfer exclusively owns its source; the engine never aliases an
/// I/O instance across transfers and destroys it on completion.
pub trait SourceBlobIo: Send {
    /// Total number of bytes this source provides.
    fn total_size(&mut self) -> u64;

    /// Copies bytes starting at `offset` into `dst`, returning how many
    /// bytes were written.
    fn fetch_fragment(&mut self, offset: u64, dst: &mut [u8]) -> usize;
}

/// Storage target consuming an incoming blob.
pub trait TargetBlobIo: Send {
    /// Stores a fragment at the given offset; returns false on failure.
    fn store_fragment(&mut self, offset: u64, data: &[u8], info: &BlobInfo) -> bool;

    /// Verifies that a previously stored fragment matches `data`.
    fn check_stored(&mut self, _offset: u64, _data: &[u8]) -> bool {
        true
    }

    /// Invoked exactly once when every fragment of the blob was stored.
    fn handle_finished(&mut self, msg_id: MessageId, info: &BlobInfo);

    /// Invoked exactly once when the transfer is cancelled or expires.
    fn handle_cancelled(&mut self) {}

    /// Hands the accumulated bytes to the engine, when this target
    /// buffers them in memory.
    ///
    /// Buffering targets return their content here after
    /// [`TargetBlobIo::handle_finished`] so the engine can re-expose the
    /// finished blob as a regular message.
    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// In-memory data source reading from an owned byte buffer.
#[derive(Debug)]
pub struct BufferSource {
    data: Vec<u8>,
}

impl BufferSource {
    /// Creates a source over the given bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl SourceBlobIo for BufferSource {
    fn total_size(&mut self) -> u64 {
        self.data.len() as u64
    }

    fn fetch_fragment(&mut self, offset: u64, dst: &mut [u8]) -> usize {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return 0;
        }
        let n = dst.len().min(self.data.len() - offset);
        dst[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

/// In-memory target accumulating fragments into a byte buffer.
#[derive(Debug, Default)]
pub struct BufferTarget {
    data: Vec<u8>,
    finished: bool,
}

impl BufferTarget {
    /// Creates an empty buffer target, pre-sized for `expected_size` bytes.
    pub fn new(expected_size: u64) -> Self {
        Self { data: vec![0u8; expected_size as usize], finished: false }
    }

    /// Returns the bytes stored so far.
    pub fn content(&self) -> &[u8] {
        &self.data
    }
}

impl TargetBlobIo for BufferTarget {
    fn store_fragment(&mut self, offset: u64, data: &[u8], _info: &BlobInfo) -> bool {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(data);
        true
    }

    fn check_stored(&mut self, offset: u64, data: &[u8]) -> bool {
        let offset = offset as usize;
        let end = offset + data.len();
        end <= self.data.len() && &self.data[offset..end] == data
    }

    fn handle_finished(&mut self, _msg_id: MessageId, _info: &BlobInfo) {
        self.finished = true;
    }

    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        if self.finished {
            Some(std::mem::take(&mut self.data))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_source_fetch() {
        let mut source = BufferSource::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(source.total_size(), 5);

        let mut dst = [0u8; 3];
        assert_eq!(source.fetch_fragment(1, &mut dst), 3);
        assert_eq!(dst, [2, 3, 4]);

        assert_eq!(source.fetch_fragment(4, &mut dst), 1);
        assert_eq!(source.fetch_fragment(5, &mut dst), 0);
        assert_eq!(source.fetch_fragment(100, &mut dst), 0);
    }

    #[test]
    fn test_buffer_target_store_and_check() {
        let mut target = BufferTarget::new(6);
        let info = BlobInfo { total_size: 6, ..Default::default() };
        assert!(target.store_fragment(0, &[1, 2, 3], &info));
        assert!(target.store_fragment(3, &[4, 5, 6], &info));
        assert_eq!(target.content(), &[1, 2, 3, 4, 5, 6]);

        assert!(target.check_stored(0, &[1, 2, 3]));
        assert!(!target.check_stored(0, &[9, 9, 9]));
        assert!(!target.check_stored(4, &[5, 6, 7]));
    }

    #[test]
    fn test_buffer_target_take_buffer_only_when_finished() {
        let mut target = BufferTarget::new(2);
        let info = BlobInfo { total_size: 2, ..Default::default() };
        target.store_fragment(0, &[7, 8], &info);
        assert!(target.take_buffer().is_none());

        let msg_id = MessageId::default();
        target.handle_finished(msg_id, &info);
        assert_eq!(target.take_buffer(), Some(vec![7, 8]));
    }
}
