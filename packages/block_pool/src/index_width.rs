use std::alloc::Layout;

/// Width of the free-chain index that a vacant slot stores in its own memory.
///
/// The narrowest width able to represent every slot index plus the end-of-chain sentinel
/// (which equals the block capacity) is chosen, so small blocks pay as little per-slot
/// overhead as possible. This only matters for items smaller than the index itself, as the
/// index shares storage with the item.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IndexWidth {
    /// Capacity of at most `0x7F`.
    Byte,

    /// Capacity of at most `0x7FFF`.
    Word,

    /// Capacity of at most `0x7FFF_FFFF`.
    DoubleWord,

    /// Anything larger.
    QuadWord,
}

impl IndexWidth {
    /// Selects the index width for a block holding `capacity` slots.
    #[must_use]
    pub(crate) const fn for_capacity(capacity: usize) -> Self {
        if capacity <= 0x7F {
            Self::Byte
        } else if capacity <= 0x7FFF {
            Self::Word
        } else if capacity <= 0x7FFF_FFFF {
            Self::DoubleWord
        } else {
            Self::QuadWord
        }
    }

    /// Size of the index in bytes. The index is aligned to its own size.
    #[must_use]
    pub(crate) const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::DoubleWord => 4,
            Self::QuadWord => 8,
        }
    }

    #[must_use]
    pub(crate) fn layout(self) -> Layout {
        Layout::from_size_align(self.bytes(), self.bytes())
            .expect("power of two sizes are always valid layouts")
    }

    /// Writes `index` at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of [`bytes()`][Self::bytes] bytes and aligned to the same.
    /// The index must fit in the width, which holds for any index up to the capacity this width
    /// was selected for.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "width is selected to fit every index up to capacity"
    )]
    pub(crate) unsafe fn write(self, ptr: *mut u8, index: usize) {
        // SAFETY: Forwarding validity and alignment requirements to the caller.
        unsafe {
            match self {
                Self::Byte => ptr.write(index as u8),
                Self::Word => ptr.cast::<u16>().write(index as u16),
                Self::DoubleWord => ptr.cast::<u32>().write(index as u32),
                Self::QuadWord => ptr.cast::<u64>().write(index as u64),
            }
        }
    }

    /// Reads an index previously stored at `ptr` via [`write()`][Self::write].
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of [`bytes()`][Self::bytes] bytes, aligned to the same and
    /// must hold an index written with the same width.
    #[must_use]
    pub(crate) unsafe fn read(self, ptr: *const u8) -> usize {
        // SAFETY: Forwarding validity and alignment requirements to the caller.
        let value = unsafe {
            match self {
                Self::Byte => u64::from(ptr.read()),
                Self::Word => u64::from(ptr.cast::<u16>().read()),
                Self::DoubleWord => u64::from(ptr.cast::<u32>().read()),
                Self::QuadWord => ptr.cast::<u64>().read(),
            }
        };

        usize::try_from(value).expect("stored index was written from a usize so it must fit")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert_eq!(IndexWidth::for_capacity(1), IndexWidth::Byte);
        assert_eq!(IndexWidth::for_capacity(0x7F), IndexWidth::Byte);
        assert_eq!(IndexWidth::for_capacity(0x80), IndexWidth::Word);
        assert_eq!(IndexWidth::for_capacity(0x7FFF), IndexWidth::Word);
        assert_eq!(IndexWidth::for_capacity(0x8000), IndexWidth::DoubleWord);
        assert_eq!(IndexWidth::for_capacity(0x7FFF_FFFF), IndexWidth::DoubleWord);
        assert_eq!(IndexWidth::for_capacity(0x8000_0000), IndexWidth::QuadWord);
    }

    #[test]
    fn layout_is_self_aligned() {
        for width in [
            IndexWidth::Byte,
            IndexWidth::Word,
            IndexWidth::DoubleWord,
            IndexWidth::QuadWord,
        ] {
            let layout = width.layout();
            assert_eq!(layout.size(), width.bytes());
            assert_eq!(layout.align(), width.bytes());
        }
    }

    #[test]
    fn write_then_read_at_sentinel() {
        let mut storage = 0_u64;
        let ptr = (&raw mut storage).cast::<u8>();

        for (width, capacity) in [
            (IndexWidth::Byte, 0x7F_usize),
            (IndexWidth::Word, 0x7FFF),
            (IndexWidth::DoubleWord, 0x7FFF_FFFF),
        ] {
            // SAFETY: A u64 is large enough and aligned enough for every width.
            unsafe {
                width.write(ptr, capacity);
            }

            // SAFETY: We just wrote an index of this width.
            let read_back = unsafe { width.read(ptr) };
            assert_eq!(read_back, capacity);
        }
    }
}
