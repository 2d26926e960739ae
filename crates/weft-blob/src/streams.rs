//! Synthesized byte stream sources.
//!
//! These sources generate their content on the fly and are primarily used
//! by the resource server vocabulary (`/zeroes`, `/ones`, `/random`,
//! `/sequence`) and by transfer tests that need large, cheap payloads.

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::io::SourceBlobIo;

/// Source producing `size` copies of a single byte value.
#[derive(Clone, Copy, Debug)]
pub struct ConstantSource {
    size: u64,
    value: u8,
}

impl ConstantSource {
    /// Creates a constant-byte source.
    pub fn new(size: u64, value: u8) -> Self {
        Self { size, value }
    }

    /// Creates an all-zero source.
    pub fn zeroes(size: u64) -> Self {
        Self::new(size, 0x00)
    }

    /// Creates an all-one source.
    pub fn ones(size: u64) -> Self {
        Self::new(size, 0x01)
    }
}

impl SourceBlobIo for ConstantSource {
    fn total_size(&mut self) -> u64 {
        self.size
    }

    fn fetch_fragment(&mut self, offset: u64, dst: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let n = dst.len().min((self.size - offset) as usize);
        dst[..n].fill(self.value);
        n
    }
}

/// Source producing a deterministic, position-addressable byte sequence.
///
/// Every 8-byte block holds its own block index in big-endian byte order,
/// so the byte at any absolute offset can be regenerated independently.
/// This makes the stream verifiable at the receiver and resendable from
/// any offset without keeping state.
#[derive(Clone, Copy, Debug)]
pub struct SequenceSource {
    size: u64,
}

impl SequenceSource {
    /// Creates a sequence source of the given size.
    pub fn new(size: u64) -> Self {
        Self { size }
    }

    /// The byte of the sequence at the given absolute offset.
    pub fn byte_at(offset: u64) -> u8 {
        let block = offset / 8;
        let index = offset % 8;
        // Byte `index` of the byte-swapped block counter
        (block.swap_bytes() >> (8 * index)) as u8
    }
}

impl SourceBlobIo for SequenceSource {
    fn total_size(&mut self) -> u64 {
        self.size
    }

    fn fetch_fragment(&mut self, offset: u64, dst: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let n = dst.len().min((self.size - offset) as usize);
        for (i, b) in dst[..n].iter_mut().enumerate() {
            *b = Self::byte_at(offset + i as u64);
        }
        n
    }
}

/// Source producing cryptographically seeded random bytes.
///
/// Note that refetching a range (e.g. for a resend) produces different
/// bytes; receivers of random streams must not verify content.
#[derive(Debug)]
pub struct RandomSource {
    size: u64,
    rng: StdRng,
}

impl RandomSource {
    /// Creates a random source of the given size.
    pub fn new(size: u64) -> Self {
        Self { size, rng: StdRng::from_entropy() }
    }
}

impl SourceBlobIo for RandomSource {
    fn total_size(&mut self) -> u64 {
        self.size
    }

    fn fetch_fragment(&mut self, offset: u64, dst: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let n = dst.len().min((self.size - offset) as usize);
        self.rng.fill_bytes(&mut dst[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_source_fills() {
        let mut source = ConstantSource::ones(10);
        let mut dst = [0xffu8; 8];
        assert_eq!(source.fetch_fragment(0, &mut dst), 8);
        assert!(dst.iter().all(|&b| b == 1));

        assert_eq!(source.fetch_fragment(8, &mut dst), 2);
        assert_eq!(source.fetch_fragment(10, &mut dst), 0);
    }

    #[test]
    fn test_sequence_source_block_layout() {
        // Block k holds k as big-endian bytes
        assert_eq!(SequenceSource::byte_at(0), 0);
        assert_eq!(SequenceSource::byte_at(7), 0);
        assert_eq!(SequenceSource::byte_at(15), 1);
        assert_eq!(SequenceSource::byte_at(8 * 0x0102 + 6), 0x01);
        assert_eq!(SequenceSource::byte_at(8 * 0x0102 + 7), 0x02);
    }

    #[test]
    fn test_sequence_source_fetch_matches_byte_at() {
        let mut source = SequenceSource::new(64);
        let mut dst = [0u8; 16];
        assert_eq!(source.fetch_fragment(20, &mut dst), 16);
        for (i, &b) in dst.iter().enumerate() {
            assert_eq!(b, SequenceSource::byte_at(20 + i as u64));
        }
    }

    #[test]
    fn test_sequence_source_restartable() {
        // Fetching the same range twice yields identical bytes
        let mut source = SequenceSource::new(256);
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        source.fetch_fragment(100, &mut first);
        source.fetch_fragment(100, &mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn test_random_source_bounds() {
        let mut source = RandomSource::new(12);
        let mut dst = [0u8; 16];
        assert_eq!(source.fetch_fragment(0, &mut dst), 12);
        assert_eq!(source.fetch_fragment(12, &mut dst), 0);
    }
}
