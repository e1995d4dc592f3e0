use blake3::Hasher;

use crate::Scalar;

/// Order-sensitive digest over simulation state.
///
/// Everything funnels through little-endian byte encodings, so two runs hash
/// equal exactly when they produced bit-identical state in the same order.
pub struct StateDigest {
    hasher: Hasher,
}

impl StateDigest {
    pub fn new() -> Self {
        Self { hasher: Hasher::new() }
    }

    pub fn record_u32(&mut self, value: u32) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub fn record_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_le_bytes());
    }

    /// Records a run of scalars; vectors and quaternions are fed as their
    /// component slices.
    pub fn record_scalars(&mut self, values: &[Scalar]) {
        for value in values {
            self.hasher.update(&value.to_le_bytes());
        }
    }

    pub fn finish(self) -> [u8; 32] {
        *self.hasher.finalize().as_bytes()
    }
}

impl Default for StateDigest {
    fn default() -> Self {
        Self::new()
    }
}
