//! CPU set bitmasks.
//!
//! A [`CpuMask`] is the wire format shared with callers: a fixed number of
//! 64-bit words where bit `i % 64` of word `i / 64` is set iff CPU `i` is a
//! member. Byte-granular layouts are not accepted. The kernel side uses
//! native `unsigned long` words, whose width depends on the target, so every
//! transfer between the two goes through [`CpuMask::to_native`] and
//! [`CpuMask::load_native`].

use std::fmt;
use std::io;

use crate::error::{Error, Result};

/// Width of one wire word in bits.
pub const WORD_BITS: usize = 64;

/// A set of CPU IDs packed into caller-owned 64-bit words.
///
/// The word count is fixed at construction. Operations in this crate never
/// grow or shrink it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CpuMask {
    words: Vec<u64>,
}

impl CpuMask {
    /// Number of words needed to address `num_cpus` CPUs.
    #[inline]
    pub fn words_for(num_cpus: usize) -> usize {
        (num_cpus + WORD_BITS - 1) / WORD_BITS
    }

    /// Create an empty mask sized for `num_cpus` CPUs.
    pub fn new(num_cpus: usize) -> CpuMask {
        CpuMask {
            words: vec![0; Self::words_for(num_cpus)],
        }
    }

    /// Create an empty mask sized for every configured CPU on this host.
    pub fn system() -> CpuMask {
        CpuMask::new(crate::topology::num_cpus())
    }

    /// Create a mask containing only `cpu`.
    ///
    /// If `cpu` is not below `num_cpus` the mask is left empty.
    pub fn for_cpu(cpu: usize, num_cpus: usize) -> CpuMask {
        let mut mask = CpuMask::new(num_cpus);
        if cpu < num_cpus {
            mask.insert(cpu);
        }
        mask
    }

    /// Create a mask containing every CPU below `num_cpus`.
    pub fn all(num_cpus: usize) -> CpuMask {
        let mut mask = CpuMask::new(num_cpus);
        let full = num_cpus / WORD_BITS;
        for word in &mut mask.words[..full] {
            *word = !0;
        }
        let rest = num_cpus % WORD_BITS;
        if rest != 0 {
            mask.words[full] = (1u64 << rest) - 1;
        }
        mask
    }

    /// Create a mask sized for `num_cpus` holding the given CPUs.
    ///
    /// CPUs at or above `num_cpus` are dropped.
    pub fn from_cpus<I>(num_cpus: usize, cpus: I) -> CpuMask
    where
        I: IntoIterator<Item = usize>,
    {
        let mut mask = CpuMask::new(num_cpus);
        for cpu in cpus.into_iter().filter(|&cpu| cpu < num_cpus) {
            mask.insert(cpu);
        }
        mask
    }

    /// Wrap an existing word buffer.
    pub fn from_words(words: Vec<u64>) -> CpuMask {
        CpuMask { words }
    }

    /// The raw wire words.
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Mutable access to the raw wire words.
    #[inline]
    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// Unwrap into the raw wire words.
    pub fn into_words(self) -> Vec<u64> {
        self.words
    }

    /// Number of CPU IDs this mask can address.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    /// Fail unless the mask can address `num_cpus` CPUs.
    pub fn ensure_fits(&self, num_cpus: usize) -> Result<()> {
        let required = Self::words_for(num_cpus);
        if self.words.len() < required {
            return Err(Error::MaskTooSmall {
                required,
                actual: self.words.len(),
            });
        }
        Ok(())
    }

    /// Add `cpu`. Returns false, leaving the mask untouched, when `cpu` lies
    /// outside the buffer.
    #[inline]
    pub fn insert(&mut self, cpu: usize) -> bool {
        match self.words.get_mut(cpu / WORD_BITS) {
            Some(word) => {
                *word |= 1u64 << (cpu % WORD_BITS);
                true
            }
            None => false,
        }
    }

    /// Remove `cpu`. Returns whether it was a member.
    #[inline]
    pub fn remove(&mut self, cpu: usize) -> bool {
        match self.words.get_mut(cpu / WORD_BITS) {
            Some(word) => {
                let bit = 1u64 << (cpu % WORD_BITS);
                let was_set = *word & bit != 0;
                *word &= !bit;
                was_set
            }
            None => false,
        }
    }

    /// Whether `cpu` is a member. CPUs outside the buffer never are.
    #[inline]
    pub fn contains(&self, cpu: usize) -> bool {
        self.words
            .get(cpu / WORD_BITS)
            .map_or(false, |word| word & (1u64 << (cpu % WORD_BITS)) != 0)
    }

    /// Remove every CPU, keeping the buffer size.
    #[inline]
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }

    /// Number of member CPUs.
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// True if no CPU is a member.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// True if no CPU is a member of both masks.
    pub fn is_disjoint(&self, other: &CpuMask) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & b == 0)
    }

    /// Member CPU IDs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(index * WORD_BITS + bit)
            })
        })
    }

    /// Write members below `num_cpus` into a native word buffer.
    ///
    /// `out` is zeroed first. Members that do not fit in `out` are dropped.
    pub fn to_native<W: NativeWord>(&self, num_cpus: usize, out: &mut [W]) {
        out.iter_mut().for_each(|word| *word = W::ZERO);
        let limit = num_cpus.min(out.len() * W::BITS);
        for cpu in self.iter().take_while(|&cpu| cpu < limit) {
            let slot = &mut out[cpu / W::BITS];
            *slot = slot.with_bit(cpu % W::BITS);
        }
    }

    /// Replace the contents with the members of a native word buffer that
    /// lie below `num_cpus` and fit this mask.
    pub fn load_native<W: NativeWord>(&mut self, native: &[W], num_cpus: usize) {
        self.clear();
        let limit = num_cpus.min(self.capacity()).min(native.len() * W::BITS);
        for cpu in 0..limit {
            if native[cpu / W::BITS].bit(cpu % W::BITS) {
                self.words[cpu / WORD_BITS] |= 1u64 << (cpu % WORD_BITS);
            }
        }
    }
}

/// Renders the mask as a kernel-style CPU list, e.g. `0-3,8,10-11`.
impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cpus = self.iter().peekable();
        let mut first = true;
        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.peek() == Some(&(end + 1)) {
                end += 1;
                cpus.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// Word types the kernel uses for CPU and node bitmaps.
pub trait NativeWord: Copy + sealed::Sealed {
    /// Width in bits.
    const BITS: usize;
    /// The all-clear word.
    const ZERO: Self;
    /// Whether bit `index` is set.
    fn bit(self, index: usize) -> bool;
    /// Copy of `self` with bit `index` set.
    fn with_bit(self, index: usize) -> Self;
}

impl NativeWord for u32 {
    const BITS: usize = 32;
    const ZERO: Self = 0;

    #[inline]
    fn bit(self, index: usize) -> bool {
        self & (1 << index) != 0
    }

    #[inline]
    fn with_bit(self, index: usize) -> Self {
        self | (1 << index)
    }
}

impl NativeWord for u64 {
    const BITS: usize = 64;
    const ZERO: Self = 0;

    #[inline]
    fn bit(self, index: usize) -> bool {
        self & (1 << index) != 0
    }

    #[inline]
    fn with_bit(self, index: usize) -> Self {
        self | (1 << index)
    }
}

/// CPU IDs at or above this are rejected when parsing CPU lists.
const MAX_LIST_CPUS: usize = 1 << 16;

/// Parse a kernel CPU list such as `0-3,8-11`. Whitespace around the list
/// is ignored and an empty list yields no CPUs.
pub(crate) fn parse_cpu_list(list: &str) -> io::Result<Vec<usize>> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, format!("malformed CPU list {:?}", list));
    let parse = |cpu: &str| match cpu.trim().parse::<usize>() {
        Ok(cpu) if cpu < MAX_LIST_CPUS => Ok(cpu),
        _ => Err(invalid()),
    };
    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse(start)?;
                let end = parse(end)?;
                if end < start {
                    return Err(invalid());
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(parse(part)?),
        }
    }
    Ok(cpus)
}
