//! Splitting a save into size-capped fragments, and putting it back together.
//!
//! Pure arithmetic over byte slices; no I/O.
//!
//! ## Sizing: two passes
//!
//! 1. `units = ceil(len / quantum)`; if it fits under the cap, one fragment.
//! 2. `count = ceil(units / max_units)` is the fewest fragments that can fit.
//! 3. `frag_units = ceil(units / count)` spreads the units evenly.
//! 4. `count = ceil(len / (frag_units * quantum))` recounts against the real
//!    length, so a short tail never earns an extra fragment.
//!
//! Every fragment except the last is exactly `frag_units * quantum` bytes.

use std::ops::Range;

use cloudsaver_core::Settings;

use crate::error::SyncError;

/// Fragment cap plus the rounding quantum that keeps fragment sizes stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLayout {
    max_fragment_bytes: u64,
    quantum_bytes: u64,
}

impl FragmentLayout {
    pub fn new(max_fragment_bytes: u64, quantum_bytes: u64) -> Result<Self, SyncError> {
        if quantum_bytes == 0
            || max_fragment_bytes < quantum_bytes
            || max_fragment_bytes % quantum_bytes != 0
        {
            return Err(SyncError::InvalidLayout {
                max_fragment_bytes,
                quantum_bytes,
            });
        }
        Ok(Self {
            max_fragment_bytes,
            quantum_bytes,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SyncError> {
        Self::new(settings.max_fragment_bytes, settings.quantum_bytes)
    }

    pub fn max_fragment_bytes(&self) -> u64 {
        self.max_fragment_bytes
    }

    pub fn quantum_bytes(&self) -> u64 {
        self.quantum_bytes
    }

    /// Byte ranges of the fragments for a blob of `len` bytes.
    ///
    /// Always returns at least one range; an empty blob is one empty fragment.
    pub fn plan(&self, len: u64) -> Vec<Range<u64>> {
        let quantum = self.quantum_bytes;
        let max_units = self.max_fragment_bytes / quantum;
        let units = len.div_ceil(quantum);

        if units <= max_units {
            return vec![0..len];
        }

        let min_count = units.div_ceil(max_units);
        let frag_bytes = units.div_ceil(min_count) * quantum;
        let count = len.div_ceil(frag_bytes);

        (0..count)
            .map(|i| {
                let start = i * frag_bytes;
                start..(start + frag_bytes).min(len)
            })
            .collect()
    }

    /// Number of fragments [`Self::plan`] would produce.
    pub fn fragment_count(&self, len: u64) -> u32 {
        self.plan(len).len() as u32
    }

    /// Split `blob` into ordered fragments, each at most the cap.
    pub fn split<'a>(&self, blob: &'a [u8]) -> Vec<&'a [u8]> {
        self.plan(blob.len() as u64)
            .into_iter()
            .map(|range| &blob[range.start as usize..range.end as usize])
            .collect()
    }
}

/// Concatenate fragments in index order.
///
/// Completeness is the caller's job; this never fails.
pub fn reassemble<B: AsRef<[u8]>>(fragments: &[B]) -> Vec<u8> {
    let total = fragments.iter().map(|f| f.as_ref().len()).sum();
    let mut blob = Vec::with_capacity(total);
    for fragment in fragments {
        blob.extend_from_slice(fragment.as_ref());
    }
    blob
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn default_layout() -> FragmentLayout {
        FragmentLayout::new(100 * MIB, MIB).unwrap()
    }

    #[test]
    fn exactly_the_cap_is_one_fragment() {
        assert_eq!(default_layout().plan(100 * MIB), vec![0..100 * MIB]);
    }

    #[test]
    fn one_byte_over_the_cap_is_two_fragments() {
        let plan = default_layout().plan(100 * MIB + 1);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], 0..51 * MIB);
        assert_eq!(plan[1], 51 * MIB..100 * MIB + 1);
    }

    #[test]
    fn fragments_are_balanced_not_greedy() {
        let plan = default_layout().plan(150 * MIB);
        assert_eq!(plan, vec![0..75 * MIB, 75 * MIB..150 * MIB]);
    }

    #[test]
    fn last_fragment_takes_the_remainder() {
        let layout = FragmentLayout::new(200, 100).unwrap();
        let plan = layout.plan(450);
        assert_eq!(plan, vec![0..200, 200..400, 400..450]);

        // 401 bytes is 5 units; 3 fragments needed, sized 200/200/1.
        assert_eq!(layout.fragment_count(401), 3);
        assert_eq!(layout.fragment_count(400), 2);
    }

    #[test]
    fn empty_blob_is_one_empty_fragment() {
        let layout = FragmentLayout::new(1024, 256).unwrap();
        assert_eq!(layout.plan(0), vec![0..0]);
        let blob: [u8; 0] = [];
        assert_eq!(layout.split(&blob), vec![&blob[..]]);
    }

    #[test]
    fn split_then_reassemble_returns_the_blob() {
        let layout = FragmentLayout::new(1024, 256).unwrap();
        let blob: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let fragments = layout.split(&blob);
        assert_eq!(fragments.len(), 5);
        assert!(fragments.iter().all(|f| f.len() <= 1024));
        assert_eq!(reassemble(&fragments), blob);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(FragmentLayout::new(1000, 0).is_err());
        assert!(FragmentLayout::new(100, 1000).is_err());
        assert!(FragmentLayout::new(1000, 300).is_err());
    }
}
