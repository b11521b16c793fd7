//! Filler payload shared by the HTTP and TCP responders.

use bytes::Bytes;

/// Byte repeated to build the filler payload.
pub const FILLER_BYTE: u8 = b'a';

/// Immutable response body of a configured length.
///
/// Built once at startup; clones share the same allocation, so every
/// concurrent response reads the same bytes without synchronization.
#[derive(Debug, Clone)]
pub struct Filler(Bytes);

impl Filler {
    /// Build a filler of exactly `size` bytes.
    pub fn new(size: usize) -> Self {
        Filler(Bytes::from(vec![FILLER_BYTE; size]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A cheap handle to the payload, suitable for a response body.
    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl AsRef<[u8]> for Filler {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
