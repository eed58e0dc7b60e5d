//! Element types and their exact bit widths.

/// Element type of a region. Sub-byte widths pack multiple elements per
/// byte; the packing order inside a byte is fixed by the reference engine
/// (low nibble first) and must not be observed by programs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum ElemType {
    I4,
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    F16,
    Bf16,
    F32,
}

impl ElemType {
    /// Exact width in bits.
    pub const fn bit_width(&self) -> u64 {
        match self {
            Self::I4 => 4,
            Self::I8 | Self::U8 => 8,
            Self::I16 | Self::U16 | Self::F16 | Self::Bf16 => 16,
            Self::I32 | Self::U32 | Self::F32 => 32,
        }
    }

    pub const fn is_sub_byte(&self) -> bool {
        self.bit_width() < 8
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F16 | Self::Bf16 | Self::F32)
    }

    pub const fn is_signed_int(&self) -> bool {
        matches!(self, Self::I4 | Self::I8 | Self::I16 | Self::I32)
    }

    pub const fn is_unsigned_int(&self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32)
    }

    /// Bytes needed to hold `count` packed elements:
    /// `ceil(count * bit_width / 8)`.
    pub const fn byte_extent(&self, count: u64) -> u64 {
        (count * self.bit_width() + 7) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn widths_are_exact() {
        assert_eq!(ElemType::I4.bit_width(), 4);
        assert_eq!(ElemType::Bf16.bit_width(), 16);
        assert_eq!(ElemType::F32.bit_width(), 32);
    }

    #[test]
    fn sub_byte_packs_two_per_byte() {
        assert_eq!(ElemType::I4.byte_extent(7), 4);
        assert_eq!(ElemType::I4.byte_extent(8), 4);
        assert_eq!(ElemType::I8.byte_extent(8), 8);
    }

    #[test]
    fn names_round_trip() {
        for ty in ElemType::iter() {
            assert_eq!(ElemType::from_str(&ty.to_string()).unwrap(), ty);
        }
        assert_eq!(ElemType::from_str("bf16").unwrap(), ElemType::Bf16);
        assert!(ElemType::from_str("f64").is_err());
    }
}
