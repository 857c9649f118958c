/// Lazily splits `iter` into `Vec`s of exactly `size` elements.
///
/// The last chunk is padded with clones of `fill` when the input length is
/// not a multiple of `size`; an empty input yields no chunks.
///
/// # Panics
///
/// Panics if `size` is 0.
pub fn split_chunks<I>(iter: I, size: usize, fill: I::Item) -> SplitChunks<I::IntoIter>
where
    I: IntoIterator,
    I::Item: Clone,
{
    assert!(size > 0, "chunk size must be non-zero");
    SplitChunks {
        iter: iter.into_iter(),
        size,
        fill,
    }
}

pub struct SplitChunks<I: Iterator> {
    iter: I,
    size: usize,
    fill: I::Item,
}

impl<I> Iterator for SplitChunks<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.iter.next()?;
        let mut chunk = Vec::with_capacity(self.size);
        chunk.push(first);
        chunk.extend(self.iter.by_ref().take(self.size - 1));
        chunk.resize(self.size, self.fill.clone());
        Some(chunk)
    }
}
