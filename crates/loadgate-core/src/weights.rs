//! Weighted selection over a fixed set of entries

use crate::error::{CoreError, CoreResult};

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Validated table of `(weight, entry)` pairs.
///
/// Entries own consecutive half-open slices of `[0, 1)` in declaration order;
/// a uniform draw picks the entry whose slice contains it.
#[derive(Debug, Clone)]
pub struct WeightTable<T> {
    entries: Vec<(f64, T)>,
    cutoffs: Vec<f64>,
}

impl<T> WeightTable<T> {
    /// Validate weights and precompute cumulative cutoffs.
    ///
    /// Each weight must lie in `[0, 1]` and the sum must equal 1.0 within
    /// [`WEIGHT_SUM_TOLERANCE`].
    pub fn new(entries: Vec<(f64, T)>) -> CoreResult<Self> {
        if entries.is_empty() {
            return Err(CoreError::invalid_weights("at least one entry is required"));
        }

        for (i, (weight, _)) in entries.iter().enumerate() {
            if !weight.is_finite() || *weight < 0.0 || *weight > 1.0 {
                return Err(CoreError::invalid_weights(format!(
                    "weight #{} is {}, expected a value in [0, 1]",
                    i, weight
                )));
            }
        }

        let total: f64 = entries.iter().map(|(w, _)| w).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::invalid_weights(format!(
                "weights sum to {:.6}, expected 1.0",
                total
            )));
        }

        let mut acc = 0.0;
        let cutoffs = entries
            .iter()
            .map(|(w, _)| {
                acc += w;
                acc
            })
            .collect();

        Ok(Self { entries, cutoffs })
    }

    /// Entry owning `draw` (expected in `[0, 1)`).
    ///
    /// Draws past the last cutoff (float drift) fall back to the last entry
    /// with a non-zero weight.
    pub fn select(&self, draw: f64) -> &T {
        for (i, cutoff) in self.cutoffs.iter().enumerate() {
            if draw < *cutoff && self.entries[i].0 > 0.0 {
                return &self.entries[i].1;
            }
        }

        let fallback = self
            .entries
            .iter()
            .rposition(|(w, _)| *w > 0.0)
            .unwrap_or(self.entries.len() - 1);
        &self.entries[fallback].1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> {
        self.entries.iter().map(|(w, e)| (*w, e))
    }

    /// Upper cumulative bound of every entry, in order.
    pub fn cutoffs(&self) -> &[f64] {
        &self.cutoffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_sum() {
        let err = WeightTable::new(vec![(0.5, "a"), (0.4, "b")]).unwrap_err();
        assert!(err.to_string().contains("sum to 0.9"));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(WeightTable::new(vec![(1.5, "a"), (-0.5, "b")]).is_err());
        assert!(WeightTable::new(vec![(f64::NAN, "a")]).is_err());
        assert!(WeightTable::<&str>::new(vec![]).is_err());
    }

    #[test]
    fn test_select_boundaries() {
        let table = WeightTable::new(vec![(0.20, "create"), (0.75, "redirect"), (0.05, "404")])
            .unwrap();

        assert_eq!(*table.select(0.0), "create");
        assert_eq!(*table.select(0.1999), "create");
        assert_eq!(*table.select(0.20), "redirect");
        assert_eq!(*table.select(0.9499), "redirect");
        assert_eq!(*table.select(0.95), "404");
        assert_eq!(*table.select(0.9999), "404");
        assert_eq!(*table.select(1.0), "404");
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let table = WeightTable::new(vec![(0.0, "never"), (1.0, "always")]).unwrap();
        assert_eq!(*table.select(0.0), "always");

        let table = WeightTable::new(vec![(1.0, "always"), (0.0, "never")]).unwrap();
        assert_eq!(*table.select(1.0), "always");
    }

    #[test]
    fn test_tolerates_float_drift() {
        let table = WeightTable::new(vec![(0.1, 'a'), (0.2, 'b'), (0.7, 'c')]).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(*table.select(0.999_999_9), 'c');
    }
}
