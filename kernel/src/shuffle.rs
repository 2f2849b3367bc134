// Fisher-Yates shuffle over anything that can report its length and
// swap two positions.

use rand::Rng;

/// Indexable sequence whose elements can be swapped in place.
pub trait Swappable {
    fn len(&self) -> usize;

    fn swap(&mut self, i: usize, j: usize);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Swappable for [T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn swap(&mut self, i: usize, j: usize) {
        <[T]>::swap(self, i, j)
    }
}

impl<T> Swappable for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.as_mut_slice().swap(i, j)
    }
}

/// Uniformly permute `seq` in place.
///
/// Walks from the last index down to 1, swapping each position with a
/// uniformly chosen index in `[0, i]`.
pub fn shuffle<S, R>(seq: &mut S, rng: &mut R)
where
    S: Swappable + ?Sized,
    R: Rng + ?Sized,
{
    let len = seq.len();
    if len <= 1 {
        return;
    }
    for i in (1..len).rev() {
        let j = rng.gen_range(0..=i);
        seq.swap(i, j);
    }
}
