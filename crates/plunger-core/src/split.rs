//! Train/validation split arithmetic derived from file-name record counts.

use crate::error::{PlungerError, Result};

/// How many records of a stream go to validation (the prefix) and training
/// (the suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSplit {
    pub num_examples: usize,
    pub num_train: usize,
    pub num_valid: usize,
}

impl DataSplit {
    /// Split `num_examples` with `validation_split` held out.
    ///
    /// Training gets `floor(num_examples * (1 - validation_split))` records and
    /// validation takes the remainder, so the two always cover the stream.
    pub fn new(num_examples: usize, validation_split: f64) -> Result<Self> {
        if !(validation_split > 0.0 && validation_split < 1.0) {
            return Err(PlungerError::InvalidConfig(format!(
                "validation_split must be in (0, 1), got {validation_split}"
            )));
        }

        let num_train = (num_examples as f64 * (1.0 - validation_split)).floor() as usize;
        let num_valid = num_examples - num_train;

        Ok(Self {
            num_examples,
            num_train,
            num_valid,
        })
    }

    /// Number of batches needed to see every training record once.
    pub fn steps_per_epoch(&self, batch_size: usize) -> Result<usize> {
        steps_per_epoch(self.num_train, batch_size)
    }
}

/// `ceil(num_train / batch_size)`. A zero `batch_size` is rejected.
pub fn steps_per_epoch(num_train: usize, batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(PlungerError::InvalidConfig("batch_size must be >= 1".into()));
    }
    Ok(num_train.div_ceil(batch_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousand_examples_split() {
        let split = DataSplit::new(1000, 0.1).unwrap();
        assert_eq!(split.num_valid, 100);
        assert_eq!(split.num_train, 900);
        assert_eq!(split.num_train + split.num_valid, split.num_examples);
    }

    #[test]
    fn steps_round_up() {
        assert_eq!(steps_per_epoch(900, 2).unwrap(), 450);
        assert_eq!(steps_per_epoch(901, 2).unwrap(), 451);
        assert_eq!(DataSplit::new(1000, 0.1).unwrap().steps_per_epoch(2).unwrap(), 450);
    }

    #[test]
    fn zero_batch_size_is_an_error() {
        assert!(matches!(
            steps_per_epoch(900, 0),
            Err(PlungerError::InvalidConfig(_))
        ));
        assert!(DataSplit::new(1000, 0.1).unwrap().steps_per_epoch(0).is_err());
    }

    #[test]
    fn small_counts_still_cover_stream() {
        let split = DataSplit::new(7, 0.1).unwrap();
        assert_eq!(split.num_train, 6);
        assert_eq!(split.num_valid, 1);
    }

    #[test]
    fn out_of_range_fraction_rejected() {
        assert!(DataSplit::new(10, 0.0).is_err());
        assert!(DataSplit::new(10, 1.0).is_err());
        assert!(DataSplit::new(10, f64::NAN).is_err());
    }
}
