use std::fmt;

use smallvec::{SmallVec, smallvec};

const BITS_PER_WORD: usize = u64::BITS as usize;
const VARS_PER_WORD: usize = BITS_PER_WORD / 2;

/// Two bits per tracked variable: `assigned` (even bit) and `initialized`
/// (odd bit).
///
/// `assigned` means every path to this point bound the variable.
/// `initialized` means every path either bound or explicitly deleted it, so
/// a read that is initialized but not assigned is a read after `del`.
#[derive(Clone, PartialEq, Eq)]
pub struct FlowBits {
    words: SmallVec<[u64; 2]>,
    len: usize,
}

impl FlowBits {
    /// Nothing assigned, nothing initialized.
    pub fn new(len: usize) -> Self {
        Self {
            words: smallvec![0; len.div_ceil(VARS_PER_WORD)],
            len,
        }
    }

    /// The state of an unreachable point: identity of [`FlowBits::and_with`].
    pub fn top(len: usize) -> Self {
        let mut bits = Self::new(len);
        for index in 0..len {
            bits.define(index);
        }
        bits
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Meet of two control-flow paths.
    pub fn and_with(&mut self, other: &FlowBits) {
        debug_assert_eq!(self.len, other.len);
        for (word, other) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= *other;
        }
    }

    pub fn define(&mut self, index: usize) {
        let (word, shift) = Self::locate(index);
        self.words[word] |= 0b11 << shift;
    }

    pub fn delete(&mut self, index: usize) {
        let (word, shift) = Self::locate(index);
        self.words[word] &= !(0b01 << shift);
        self.words[word] |= 0b10 << shift;
    }

    pub fn is_assigned(&self, index: usize) -> bool {
        let (word, shift) = Self::locate(index);
        self.words[word] & (0b01 << shift) != 0
    }

    pub fn is_initialized(&self, index: usize) -> bool {
        let (word, shift) = Self::locate(index);
        self.words[word] & (0b10 << shift) != 0
    }

    #[inline]
    fn locate(index: usize) -> (usize, usize) {
        (index / VARS_PER_WORD, (index % VARS_PER_WORD) * 2)
    }
}

impl fmt::Debug for FlowBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for index in 0..self.len {
            let c = match (self.is_assigned(index), self.is_initialized(index)) {
                (true, _) => 'A',
                (false, true) => 'D',
                (false, false) => '-',
            };
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Action {
        Define(usize),
        Delete(usize),
    }

    fn state(len: usize) -> impl Strategy<Value = FlowBits> {
        prop::collection::vec(
            prop_oneof![
                (0..len).prop_map(Action::Define),
                (0..len).prop_map(Action::Delete),
            ],
            0..16,
        )
        .prop_map(move |actions| {
            let mut bits = FlowBits::new(len);
            for action in actions {
                match action {
                    Action::Define(i) => bits.define(i),
                    Action::Delete(i) => bits.delete(i),
                }
            }
            bits
        })
    }

    fn meet(a: &FlowBits, b: &FlowBits) -> FlowBits {
        let mut out = a.clone();
        out.and_with(b);
        out
    }

    proptest! {
        #[test]
        fn test_meet_is_commutative(a in state(70), b in state(70)) {
            prop_assert_eq!(meet(&a, &b), meet(&b, &a));
        }

        #[test]
        fn test_meet_is_idempotent(a in state(70)) {
            prop_assert_eq!(meet(&a, &a), a);
        }

        #[test]
        fn test_meet_is_monotone(a in state(70), b in state(70)) {
            let m = meet(&a, &b);
            for i in 0..70 {
                prop_assert!(!m.is_assigned(i) || (a.is_assigned(i) && b.is_assigned(i)));
                prop_assert!(!m.is_initialized(i) || (a.is_initialized(i) && b.is_initialized(i)));
            }
        }

        #[test]
        fn test_top_is_identity(a in state(70)) {
            prop_assert_eq!(meet(&a, &FlowBits::top(70)), a);
        }
    }

    #[rstest]
    #[case::fresh(false, false, "[-]")]
    #[case::defined(true, true, "[A]")]
    fn test_single_variable(#[case] define: bool, #[case] assigned: bool, #[case] shown: &str) {
        let mut bits = FlowBits::new(1);
        if define {
            bits.define(0);
        }
        assert_eq!(bits.is_assigned(0), assigned);
        assert_eq!(format!("{bits:?}"), shown);
    }

    #[test]
    fn test_delete_keeps_initialized() {
        let mut bits = FlowBits::new(3);
        bits.define(1);
        bits.delete(1);
        assert!(!bits.is_assigned(1));
        assert!(bits.is_initialized(1));
        assert!(!bits.is_initialized(0));
        assert_eq!(format!("{bits:?}"), "[-D-]");
    }

    #[test]
    fn test_spans_multiple_words() {
        let mut bits = FlowBits::new(100);
        bits.define(99);
        assert!(bits.is_assigned(99));
        assert!(!bits.is_assigned(98));
        assert_eq!(bits.len(), 100);
    }
}
