use std::fmt::{Debug, Error, Formatter};
use std::iter::{Enumerate, FromIterator};
use std::slice::Iter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// The class-file format needs this in a couple of places:
///
///   - constant pool and indices (most entries have width 1, but long/double have width 2)
///   - local variables (depending on type, they occupy 1 or 2 slots)
///
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: Offset(0),
        }
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
        }
    }

    /// Length of the `OffsetVec` (aka. number of entries)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current offset size of the `OffsetVec` (aka. offset of the next element to be added)
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Add an entry to the back
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));

        offset
    }

    /// Get an entry by its offset in the vector
    ///
    /// Note: this uses binary search to find the offset. An offset falling in the middle of a
    /// wide entry (or past the end) yields `None`.
    pub fn get_offset(&self, offset: Offset) -> Option<&T> {
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Ok(found_idx) => Some(&self.entries[found_idx].1),
            Err(_) => None,
        }
    }

    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        self.into_iter()
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in elems {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Slot {
        OneWide(u8),
        TwoWide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::OneWide(_) => 1,
                Slot::TwoWide(_) => 2,
            }
        }
    }

    #[test]
    fn offsets_accumulate_widths() {
        let slots: OffsetVec<Slot> = vec![
            Slot::OneWide(1),
            Slot::TwoWide(2),
            Slot::TwoWide(3),
            Slot::OneWide(4),
        ]
        .into_iter()
        .collect();

        let collected: Vec<_> = slots.iter().map(|(off, idx, s)| (off, idx, *s)).collect();
        assert_eq!(
            collected,
            vec![
                (Offset(0), 0, Slot::OneWide(1)),
                (Offset(1), 1, Slot::TwoWide(2)),
                (Offset(3), 2, Slot::TwoWide(3)),
                (Offset(5), 3, Slot::OneWide(4)),
            ]
        );
        assert_eq!(slots.offset_len(), Offset(6));
    }

    #[test]
    fn lookup_by_offset() {
        let mut slots: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        slots.push(Slot::TwoWide(7));
        slots.push(Slot::OneWide(8));

        assert_eq!(slots.get_offset(Offset(1)), Some(&Slot::TwoWide(7)));
        assert_eq!(slots.get_offset(Offset(2)), None); // middle of a wide entry
        assert_eq!(slots.get_offset(Offset(3)), Some(&Slot::OneWide(8)));
        assert_eq!(slots.get_offset(Offset(4)), None);
    }
}
