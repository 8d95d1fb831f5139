/// Row selection bitmap for one source file.
///
/// Bits are stored little-endian within each `u64` word; bit `i` set means
/// row `i` is retained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowMask {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl RowMask {
    /// Every row retained.
    pub fn all(rows: usize) -> Self {
        let word_len = (rows + 63) / 64;
        let mut words = vec![u64::MAX; word_len];
        let rem = rows % 64;
        if rem != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << rem) - 1;
            }
        }
        Self {
            words,
            len: rows,
            ones: rows,
        }
    }

    pub fn none(rows: usize) -> Self {
        Self {
            words: vec![0u64; (rows + 63) / 64],
            len: rows,
            ones: 0,
        }
    }

    pub fn from_fn(rows: usize, mut keep: impl FnMut(usize) -> bool) -> Self {
        let mut mask = Self::none(rows);
        for row in 0..rows {
            if keep(row) {
                mask.words[row / 64] |= 1u64 << (row % 64);
                mask.ones += 1;
            }
        }
        mask
    }

    /// Number of rows the mask covers, retained or not.
    pub fn rows(&self) -> usize {
        self.len
    }

    /// Number of retained rows.
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    /// Retain only rows retained by both masks.
    pub fn and_inplace(&mut self, other: &RowMask) {
        debug_assert_eq!(self.len, other.len, "RowMask length mismatch");
        let mut ones = 0usize;
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word &= *other;
            ones += word.count_ones() as usize;
        }
        self.ones = ones;
    }

    /// Indices of retained rows, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(index, &word)| {
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(index * 64 + bit)
                })
            })
            .take_while(move |&row| row < self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_sets_exactly_len_bits() {
        for rows in [0, 1, 63, 64, 65, 130] {
            let mask = RowMask::all(rows);
            assert_eq!(mask.count_ones(), rows);
            assert_eq!(mask.iter_ones().count(), rows);
        }
    }

    #[test]
    fn and_recounts_across_word_boundaries() {
        let mut even = RowMask::from_fn(130, |row| row % 2 == 0);
        let low = RowMask::from_fn(130, |row| row < 70);
        even.and_inplace(&low);

        assert_eq!(even.count_ones(), 35);
        assert_eq!(even.rows(), 130);
        let kept: Vec<usize> = even.iter_ones().collect();
        assert_eq!(kept.len(), 35);
        assert!(kept.contains(&68));
        assert!(!kept.contains(&69));
        assert!(!kept.contains(&72));
        assert_eq!(kept.last(), Some(&68));
    }

    #[test]
    fn none_retains_nothing() {
        let mask = RowMask::none(3);
        assert_eq!(mask.rows(), 3);
        assert_eq!(mask.count_ones(), 0);
        assert!(mask.iter_ones().next().is_none());
    }
}
