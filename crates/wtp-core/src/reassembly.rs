//! Out-of-order fragment reassembly.
//!
//! Fragments are indexed by byte offset. The total message length is unknown
//! until the fragment flagged `last` arrives; the message is complete once
//! the received ranges cover `0..total` without gaps. Overlapping fragments
//! are tolerated, the first copy of each byte wins.

use crate::error::FragmentError;
use std::collections::BTreeMap;

/// Largest message the control plane will reassemble.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Partial message keyed by fragment offset.
#[derive(Debug, Clone, Default)]
pub struct ReassemblyBuffer {
    chunks: BTreeMap<u32, Vec<u8>>,
    total: Option<usize>,
    buffered: usize,
}

impl ReassemblyBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total message length, once the last fragment has arrived.
    #[must_use]
    pub fn total_len(&self) -> Option<usize> {
        self.total
    }

    /// Bytes held, counting overlaps twice.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Add a fragment. Returns the message once it is complete.
    ///
    /// # Errors
    ///
    /// Returns `FragmentError` if the fragment contradicts what was already
    /// received (two different ends, data past the end) or would grow the
    /// message past [`MAX_MESSAGE_SIZE`]. The buffer should be dropped.
    pub fn insert(
        &mut self,
        offset: u32,
        payload: &[u8],
        last: bool,
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        let start = offset as usize;
        let end = start + payload.len();

        if end > MAX_MESSAGE_SIZE || self.buffered + payload.len() > 2 * MAX_MESSAGE_SIZE {
            return Err(FragmentError::TooLarge(end));
        }
        if payload.is_empty() && !last {
            return Err(FragmentError::Malformed("empty middle fragment"));
        }

        if last {
            if self.total.is_some_and(|total| total != end) {
                return Err(FragmentError::Malformed("conflicting message end"));
            }
            if self.chunks.iter().any(|(&o, c)| o as usize + c.len() > end) {
                return Err(FragmentError::Malformed("fragment past message end"));
            }
            self.total = Some(end);
        } else if self.total.is_some_and(|total| end > total) {
            return Err(FragmentError::Malformed("fragment past message end"));
        }

        if !self.chunks.contains_key(&offset) {
            self.chunks.insert(offset, payload.to_vec());
            self.buffered += payload.len();
        }

        Ok(self.try_assemble())
    }

    fn try_assemble(&self) -> Option<Vec<u8>> {
        let total = self.total?;

        let mut covered = 0usize;
        for (&offset, chunk) in &self.chunks {
            let start = offset as usize;
            if start > covered {
                return None;
            }
            covered = covered.max(start + chunk.len());
        }
        if covered < total {
            return None;
        }

        let mut message = vec![0u8; total];
        // Write in reverse so earlier chunks win on overlap
        for (&offset, chunk) in self.chunks.iter().rev() {
            let start = offset as usize;
            message[start..start + chunk.len()].copy_from_slice(chunk);
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fragment() {
        let mut buffer = ReassemblyBuffer::new();
        assert_eq!(
            buffer.insert(0, b"hello", true).unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn test_out_of_order() {
        let mut buffer = ReassemblyBuffer::new();
        assert_eq!(buffer.insert(6, b"world", true).unwrap(), None);
        assert_eq!(buffer.total_len(), Some(11));
        assert_eq!(
            buffer.insert(0, b"hello ", false).unwrap(),
            Some(b"hello world".to_vec())
        );
    }

    #[test]
    fn test_missing_middle_never_completes() {
        let mut buffer = ReassemblyBuffer::new();
        assert_eq!(buffer.insert(0, b"aaaa", false).unwrap(), None);
        assert_eq!(buffer.insert(8, b"cccc", true).unwrap(), None);
        // Duplicates of what we have do not fill the gap
        assert_eq!(buffer.insert(0, b"aaaa", false).unwrap(), None);
        assert_eq!(buffer.insert(8, b"cccc", true).unwrap(), None);

        assert_eq!(
            buffer.insert(4, b"bbbb", false).unwrap(),
            Some(b"aaaabbbbcccc".to_vec())
        );
    }

    #[test]
    fn test_conflicting_end() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(4, b"xx", true).unwrap();
        assert!(buffer.insert(4, b"xxx", true).is_err());
    }

    #[test]
    fn test_fragment_past_end() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(4, b"cd", true).unwrap();
        assert!(buffer.insert(5, b"zz", false).is_err());
    }

    #[test]
    fn test_last_before_existing_data_rejected() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(8, b"late", false).unwrap();
        assert!(buffer.insert(0, b"ab", true).is_err());
    }

    #[test]
    fn test_empty_middle_fragment() {
        let mut buffer = ReassemblyBuffer::new();
        assert!(buffer.insert(0, b"", false).is_err());
    }

    #[test]
    fn test_too_large() {
        let mut buffer = ReassemblyBuffer::new();
        let result = buffer.insert(MAX_MESSAGE_SIZE as u32, b"x", true);
        assert!(matches!(result, Err(FragmentError::TooLarge(_))));
    }

    #[test]
    fn test_overlap_first_wins() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(0, b"abcd", false).unwrap();
        assert_eq!(
            buffer.insert(2, b"XYef", true).unwrap(),
            Some(b"abcdef".to_vec())
        );
    }
}
