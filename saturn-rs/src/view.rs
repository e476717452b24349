//! Provides the immutable value type which is stored in and handed out by the caches.
//!
//! A [ByteView] wraps a shared, immutable buffer. Cloning a view is cheap as only a reference
//! count is incremented. Handing out the underlying data either happens as a read-only borrow
//! or as a copy ([ByteView::byte_slice]), therefore a caller can never modify what the cache
//! holds.
//!
//! # Examples
//!
//! ```
//! # use saturn::view::ByteView;
//! let view = ByteView::from("630");
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.as_string(), "630");
//!
//! // Modifying a copy leaves the view untouched...
//! let mut copy = view.byte_slice();
//! copy[0] = b'7';
//! assert_eq!(view.as_string(), "630");
//! ```
use std::fmt::{Debug, Formatter};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable view on a chunk of bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if the view contains no data at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the underlying data.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Provides read-only access to the underlying data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the data as string.
    ///
    /// Invalid UTF-8 sequences are replaced by the unicode replacement character.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::from(data.as_bytes())
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        ByteView::from(data.into_bytes())
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.data))
    }
}
