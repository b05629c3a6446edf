// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Content hashing for the file catalog. Grounded on
//! `examples/original_source/src/interface/sha1.h`: the catalog's file
//! identity is the raw 20-byte SHA-1 digest, with a `hex()` form used only
//! for logging.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw 20-byte SHA-1 digest, used as the content-addressed identity of a
/// catalog file entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha1Hash(pub [u8; 20]);

impl Sha1Hash {
    /// Hashes `data` and returns its digest.
    pub fn calculate(data: &[u8]) -> Self {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Sha1Hash(bytes)
    }

    /// Lowercase hex form, for logging only.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Hash({})", self.hex())
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}
