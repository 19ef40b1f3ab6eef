//! Word-aligned slot storage for call frames.

use std::ptr;

use enginelink_core::{NativeValue, WORD};

/// Frames needing up to this many words keep their slots inline.
pub const INLINE_WORDS: usize = 32;

/// Slot memory of one frame: inline for common signatures, boxed for large
/// ones. Every slot starts on a word boundary.
pub(crate) enum SlotStorage {
    Inline([u64; INLINE_WORDS]),
    Heap(Box<[u64]>),
}

impl SlotStorage {
    /// Zeroed storage for `words` words.
    pub fn new(words: usize) -> Self {
        if words <= INLINE_WORDS {
            SlotStorage::Inline([0; INLINE_WORDS])
        } else {
            SlotStorage::Heap(vec![0; words].into_boxed_slice())
        }
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self, SlotStorage::Inline(_))
    }

    #[inline]
    fn words(&self) -> &[u64] {
        match self {
            SlotStorage::Inline(words) => words,
            SlotStorage::Heap(words) => words,
        }
    }

    #[inline]
    fn words_mut(&mut self) -> &mut [u64] {
        match self {
            SlotStorage::Inline(words) => words,
            SlotStorage::Heap(words) => words,
        }
    }

    /// Storage bytes from word `word` on, `len` long.
    pub fn bytes(&self, word: usize, len: usize) -> &[u8] {
        let words = self.words();
        // SAFETY: u64 has no padding; the view stays within `words`.
        let all =
            unsafe { std::slice::from_raw_parts(words.as_ptr().cast::<u8>(), words.len() * WORD) };
        &all[word * WORD..word * WORD + len]
    }

    pub fn bytes_mut(&mut self, word: usize, len: usize) -> &mut [u8] {
        let words = self.words_mut();
        // SAFETY: as in `bytes`, and we hold the only borrow.
        let all = unsafe {
            std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * WORD)
        };
        &mut all[word * WORD..word * WORD + len]
    }

    /// Writes exactly `T::KIND.size()` bytes at the start of word `word`.
    #[inline]
    pub fn write<T: NativeValue>(&mut self, word: usize, value: T) {
        let dst = self.bytes_mut(word, T::KIND.size());
        // SAFETY: `dst` is word aligned, which covers any NativeValue's
        // alignment, and exactly size_of::<T>() long.
        unsafe { ptr::write(dst.as_mut_ptr().cast::<T>(), value) }
    }

    #[inline]
    pub fn read<T: NativeValue>(&self, word: usize) -> T {
        let src = self.bytes(word, T::KIND.size());
        // SAFETY: as in `write`; every bit pattern is a valid NativeValue.
        unsafe { ptr::read(src.as_ptr().cast::<T>()) }
    }

    pub fn write_words(&mut self, word: usize, values: &[usize]) {
        let dst = &mut self.words_mut()[word..word + values.len()];
        for (slot, value) in dst.iter_mut().zip(values) {
            *slot = *value as u64;
        }
    }

    pub fn read_words(&self, word: usize, out: &mut [usize]) {
        let src = &self.words()[word..word + out.len()];
        for (value, slot) in out.iter_mut().zip(src) {
            *value = *slot as usize;
        }
    }

    /// Base pointer of the slot memory. Slot pointers for a call must all be
    /// derived from one base.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words_mut().as_mut_ptr().cast::<u8>()
    }
}
