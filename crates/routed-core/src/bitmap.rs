//! Growable bit-set used to record the ranks reachable beneath a tree node.
//!
//! Storage is a vector of 64-bit words. `set_bit` is the only operation that
//! grows the storage; every other mutating call treats the current capacity
//! as a hard bound. An optional ceiling caps growth and becomes immutable
//! once any bit has been set.

use thiserror::Error;

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitmapError {
    #[error("Bit {bit} is beyond capacity {capacity}")]
    OutOfRange { bit: usize, capacity: usize },
    #[error("Bit {bit} exceeds the configured ceiling of {max} bits")]
    CeilingExceeded { bit: usize, max: usize },
    #[error("Bitmaps differ in size: {left} vs {right} bits")]
    SizeMismatch { left: usize, right: usize },
    #[error("Ceiling cannot change after a bit has been set")]
    CeilingLocked,
}

fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Dynamically growable bit-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    /// Growth ceiling in words (None = unbounded)
    max_words: Option<usize>,
    /// Set once any bit has ever been set; freezes the ceiling
    touched: bool,
}

impl Bitmap {
    /// Create an empty bitmap with zero capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bitmap able to hold at least `bits` bits without growing.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; words_for(bits)],
            max_words: None,
            touched: false,
        }
    }

    /// Configure the growth ceiling, rounded up to a whole word.
    ///
    /// Must happen before the first bit is set.
    pub fn set_max_size(&mut self, max_bits: usize) -> Result<(), BitmapError> {
        if self.touched {
            return Err(BitmapError::CeilingLocked);
        }
        let max_words = words_for(max_bits);
        self.words.truncate(max_words);
        self.max_words = Some(max_words);
        Ok(())
    }

    /// Current capacity in bits.
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    /// Configured ceiling in bits, if any.
    pub fn max_size(&self) -> Option<usize> {
        self.max_words.map(|w| w * WORD_BITS)
    }

    /// Set a bit, growing the storage if needed.
    pub fn set_bit(&mut self, bit: usize) -> Result<(), BitmapError> {
        let word = bit / WORD_BITS;
        if let Some(max_words) = self.max_words
            && word >= max_words
        {
            return Err(BitmapError::CeilingExceeded {
                bit,
                max: max_words * WORD_BITS,
            });
        }
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % WORD_BITS);
        self.touched = true;
        Ok(())
    }

    /// Clear a bit. Never grows.
    pub fn clear_bit(&mut self, bit: usize) -> Result<(), BitmapError> {
        let word = bit / WORD_BITS;
        if word >= self.words.len() {
            return Err(BitmapError::OutOfRange {
                bit,
                capacity: self.capacity(),
            });
        }
        self.words[word] &= !(1u64 << (bit % WORD_BITS));
        Ok(())
    }

    /// Check a bit. Out-of-range bits read as unset.
    pub fn is_set(&self, bit: usize) -> bool {
        self.words
            .get(bit / WORD_BITS)
            .map(|w| w & (1u64 << (bit % WORD_BITS)) != 0)
            .unwrap_or(false)
    }

    /// Find the lowest unset bit, set it and return its index.
    ///
    /// Grows by one bit past the current capacity when every bit is set.
    pub fn find_and_set_first_unset(&mut self) -> Result<usize, BitmapError> {
        let position = self
            .words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u64::MAX)
            .map(|(i, w)| i * WORD_BITS + w.trailing_ones() as usize)
            .unwrap_or_else(|| self.capacity());
        self.set_bit(position)?;
        Ok(position)
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Set every bit within the current capacity.
    pub fn set_all(&mut self) {
        self.words.fill(u64::MAX);
        if !self.words.is_empty() {
            self.touched = true;
        }
    }

    pub fn and_inplace(&mut self, other: &Bitmap) -> Result<(), BitmapError> {
        self.check_same_size(other)?;
        self.words
            .iter_mut()
            .zip(&other.words)
            .for_each(|(a, b)| *a &= *b);
        Ok(())
    }

    pub fn or_inplace(&mut self, other: &Bitmap) -> Result<(), BitmapError> {
        self.check_same_size(other)?;
        self.words
            .iter_mut()
            .zip(&other.words)
            .for_each(|(a, b)| *a |= *b);
        if !self.is_empty() {
            self.touched = true;
        }
        Ok(())
    }

    pub fn xor_inplace(&mut self, other: &Bitmap) -> Result<(), BitmapError> {
        self.check_same_size(other)?;
        self.words
            .iter_mut()
            .zip(&other.words)
            .for_each(|(a, b)| *a ^= *b);
        if !self.is_empty() {
            self.touched = true;
        }
        Ok(())
    }

    fn check_same_size(&self, other: &Bitmap) -> Result<(), BitmapError> {
        if self.words.len() != other.words.len() {
            return Err(BitmapError::SizeMismatch {
                left: self.capacity(),
                right: other.capacity(),
            });
        }
        Ok(())
    }

    /// Count set bits among the first `limit` bits.
    pub fn count_set(&self, limit: usize) -> Result<usize, BitmapError> {
        if limit > self.capacity() {
            return Err(BitmapError::OutOfRange {
                bit: limit,
                capacity: self.capacity(),
            });
        }
        let full = limit / WORD_BITS;
        let mut count: usize = self.words[..full]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let rem = limit % WORD_BITS;
        if rem > 0 {
            let mask = (1u64 << rem) - 1;
            count += (self.words[full] & mask).count_ones() as usize;
        }
        Ok(count)
    }

    /// Count unset bits among the first `limit` bits.
    pub fn count_unset(&self, limit: usize) -> Result<usize, BitmapError> {
        Ok(limit - self.count_set(limit)?)
    }

    /// Total number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// True when the two bitmaps differ in size or content.
    pub fn is_different(&self, other: &Bitmap) -> bool {
        self.words != other.words
    }

    /// Iterate over set bit indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }

    /// One character per bit: `X` for set, `_` for unset.
    pub fn to_debug_string(&self) -> String {
        (0..self.capacity())
            .map(|bit| if self.is_set(bit) { 'X' } else { '_' })
            .collect()
    }
}
