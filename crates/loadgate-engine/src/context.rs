//! Shared, read-only context produced by setup

use rand::Rng;
use std::sync::Arc;

/// Short codes created during setup, shared by every worker.
///
/// Cloning is a reference-count bump; there is no mutation API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedContext {
    codes: Arc<[String]>,
}

impl SharedContext {
    pub fn new(codes: Vec<String>) -> Self {
        Self {
            codes: codes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    /// Uniformly pick one code; `None` when the pool is empty.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        if self.codes.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.codes.len());
        Some(self.codes[index].as_str())
    }
}

impl From<Vec<String>> for SharedContext {
    fn from(codes: Vec<String>) -> Self {
        Self::new(codes)
    }
}
