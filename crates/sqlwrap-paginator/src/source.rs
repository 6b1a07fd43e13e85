//! Data sources a [`Paginator`](crate::Paginator) can slice.

use std::convert::Infallible;
use std::ops::Range;

/// Something with a known length that can hand out a contiguous slice.
///
/// In-memory sequences slice by index; database-backed sources run an
/// offset/limit query. The paginator only ever calls these two methods, so
/// callers never special-case the kind of source.
pub trait PageSource {
    /// Type of the items returned for a page.
    type Item;

    /// Error raised while counting or fetching.
    type Error;

    /// Total number of items available.
    fn total(&self) -> Result<u64, Self::Error>;

    /// Returns at most `limit` items starting at `offset`.
    fn slice(&self, offset: u64, limit: u64) -> Result<Vec<Self::Item>, Self::Error>;
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

impl<T: Clone> PageSource for [T] {
    type Item = T;
    type Error = Infallible;

    fn total(&self) -> Result<u64, Self::Error> {
        Ok(self.len() as u64)
    }

    fn slice(&self, offset: u64, limit: u64) -> Result<Vec<T>, Self::Error> {
        let start = to_usize(offset).min(self.len());
        let end = start.saturating_add(to_usize(limit)).min(self.len());
        Ok(self[start..end].to_vec())
    }
}

impl<T: Clone> PageSource for Vec<T> {
    type Item = T;
    type Error = Infallible;

    fn total(&self) -> Result<u64, Self::Error> {
        self.as_slice().total()
    }

    fn slice(&self, offset: u64, limit: u64) -> Result<Vec<T>, Self::Error> {
        self.as_slice().slice(offset, limit)
    }
}

impl<S: PageSource + ?Sized> PageSource for &S {
    type Item = S::Item;
    type Error = S::Error;

    fn total(&self) -> Result<u64, Self::Error> {
        (**self).total()
    }

    fn slice(&self, offset: u64, limit: u64) -> Result<Vec<Self::Item>, Self::Error> {
        (**self).slice(offset, limit)
    }
}

macro_rules! range_source {
    ($($t:ty),*) => {$(
        impl PageSource for Range<$t> {
            type Item = $t;
            type Error = Infallible;

            fn total(&self) -> Result<u64, Self::Error> {
                Ok(self.clone().size_hint().0 as u64)
            }

            fn slice(&self, offset: u64, limit: u64) -> Result<Vec<$t>, Self::Error> {
                Ok(self
                    .clone()
                    .skip(to_usize(offset))
                    .take(to_usize(limit))
                    .collect())
            }
        }
    )*};
}

range_source!(u32, u64, usize, i32, i64);

/// No data at all; pair it with an explicit total to paginate a count.
impl PageSource for () {
    type Item = ();
    type Error = Infallible;

    fn total(&self) -> Result<u64, Self::Error> {
        Ok(0)
    }

    fn slice(&self, _offset: u64, _limit: u64) -> Result<Vec<()>, Self::Error> {
        Ok(Vec::new())
    }
}
