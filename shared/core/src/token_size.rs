use serde::{Deserialize, Serialize};

/// Width of one token id on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSize {
    TwoBytes,
    FourBytes,
}

impl TokenSize {
    /// Smallest width whose range covers every id of a `vocab_size`-entry
    /// vocabulary. The separator id lives inside the vocabulary, so no extra
    /// headroom is added.
    pub fn for_vocab_size(vocab_size: usize) -> Self {
        if vocab_size <= u16::MAX as usize + 1 {
            TokenSize::TwoBytes
        } else {
            TokenSize::FourBytes
        }
    }

    /// Largest id this width can hold.
    pub fn max_token(self) -> u32 {
        match self {
            TokenSize::TwoBytes => u16::MAX as u32,
            TokenSize::FourBytes => u32::MAX,
        }
    }
}

impl From<TokenSize> for usize {
    fn from(value: TokenSize) -> usize {
        match value {
            TokenSize::TwoBytes => 2,
            TokenSize::FourBytes => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_width_tracks_vocab_size() {
        assert_eq!(TokenSize::for_vocab_size(32_000), TokenSize::TwoBytes);
        assert_eq!(TokenSize::for_vocab_size(65_536), TokenSize::TwoBytes);
        assert_eq!(TokenSize::for_vocab_size(65_537), TokenSize::FourBytes);
        assert_eq!(TokenSize::for_vocab_size(200_000), TokenSize::FourBytes);
    }

    #[test]
    fn byte_widths() {
        assert_eq!(usize::from(TokenSize::TwoBytes), 2);
        assert_eq!(usize::from(TokenSize::FourBytes), 4);
    }
}
