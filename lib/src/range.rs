use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

/// Range where lower bound is inclusive, upper bound is exclusive or unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T>(T, Option<T>);

impl<T> Range<T>
where
    T: Ord,
{
    /// # Panics
    ///
    /// If `to` is not greater than `from`.
    pub fn new(from: T, to: Option<T>) -> Self {
        if let Some(ref to) = to {
            if from >= *to {
                panic!("ranges must go from low to high")
            }
        }
        Range(from, to)
    }

    pub fn contains(&self, val: &T) -> bool {
        match &self.1 {
            Some(end) => val >= &self.0 && val < end,
            None => val >= &self.0,
        }
    }
}

impl<T> fmt::Display for Range<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.1 {
            Some(end) => write!(f, "{} - {}", self.0, end),
            None => write!(f, "{}+", self.0),
        }
    }
}

/// An ordered list of ranges used as histogram buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSet<T> {
    ranges: Vec<Range<T>>,
}

impl<T> RangeSet<T> {
    pub fn new(ranges: Vec<Range<T>>) -> Self {
        Self { ranges }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<T>> + '_ {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl RangeSet<u32> {
    /// Equal-width bins starting at 0 and covering `max`.
    ///
    /// # Panics
    ///
    /// If `width` is 0.
    pub fn uniform(width: u32, max: u32) -> Self {
        assert!(width > 0, "bin width must be positive");
        let count = max / width + 1;
        Self::new(
            (0..count)
                .map(|idx| Range::new(idx * width, Some((idx + 1) * width)))
                .collect(),
        )
    }
}

impl<T> RangeSet<T>
where
    T: Ord,
{
    /// The first range containing `value`.
    pub fn position(&self, value: &T) -> Option<usize> {
        self.ranges.iter().position(|range| range.contains(value))
    }

    /// Count values in each range. Values in no range are not counted. Overlapping ranges
    /// each count a value.
    pub fn bucket_values<I, B>(self, values: I) -> RangeSetCounts<T>
    where
        I: IntoIterator<Item = B>,
        B: Borrow<T>,
    {
        let mut counts = vec![0usize; self.ranges.len()];
        for value in values {
            self.tally(value.borrow(), &mut counts);
        }
        RangeSetCounts { set: self, counts }
    }

    /// Like `bucket_values`, but missing values are counted in a final bucket of their own.
    pub fn bucket_values_with_missing<I, B>(self, values: I) -> RangeSetCountsWithMissing<T>
    where
        I: IntoIterator<Item = Option<B>>,
        B: Borrow<T>,
    {
        let mut counts = vec![0usize; self.ranges.len() + 1];
        let missing = self.ranges.len();
        for value in values {
            match value {
                Some(value) => self.tally(value.borrow(), &mut counts),
                None => counts[missing] += 1,
            }
        }
        RangeSetCountsWithMissing { set: self, counts }
    }

    fn tally(&self, value: &T, counts: &mut [usize]) {
        for (idx, range) in self.ranges.iter().enumerate() {
            if range.contains(value) {
                counts[idx] += 1;
            }
        }
    }
}

/// A range set with values bucketed, and bucket sizes recorded.
#[derive(Debug, Clone)]
pub struct RangeSetCounts<T> {
    set: RangeSet<T>,
    counts: Vec<usize>,
}

impl<T> RangeSetCounts<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&Range<T>, usize)> {
        self.set.iter().zip_eq(self.counts.iter().copied())
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// A range set with values bucketed, and bucket sizes recorded, plus a count of missing values.
#[derive(Debug, Clone)]
pub struct RangeSetCountsWithMissing<T> {
    set: RangeSet<T>,
    counts: Vec<usize>,
}

impl<T> RangeSetCountsWithMissing<T> {
    pub fn iter(&self) -> impl Iterator<Item = (Option<&Range<T>>, usize)> {
        self.set
            .iter()
            .zip_longest(self.counts.iter().copied())
            .map(|el| match el {
                EitherOrBoth::Left(_) => unreachable!(),
                EitherOrBoth::Right(count) => (None, count),
                EitherOrBoth::Both(range, count) => (Some(range), count),
            })
    }
}

impl<T> RangeSetCountsWithMissing<T>
where
    T: fmt::Display,
{
    pub fn for_display(&self) -> impl Iterator<Item = (&dyn fmt::Display, usize)> {
        self.iter().map(|(range, count)| {
            let range = match range {
                Some(range) => range,
                None => &"missing data" as &dyn fmt::Display,
            };
            (range, count)
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Range, RangeSet};

    #[test]
    fn contains() {
        let range = Range::new(10, Some(20));
        assert!(range.contains(&10));
        assert!(range.contains(&19));
        assert!(!range.contains(&20));
        assert!(Range::new(80, None).contains(&120));
        assert_eq!(range.to_string(), "10 - 20");
        assert_eq!(Range::new(80, None).to_string(), "80+");
    }

    #[test]
    #[should_panic]
    fn backwards() {
        Range::new(5, Some(5));
    }

    #[test]
    fn uniform_bins() {
        let bins = RangeSet::uniform(5, 12);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins.position(&0), Some(0));
        assert_eq!(bins.position(&12), Some(2));
        assert_eq!(bins.position(&15), None);
        assert_eq!(RangeSet::uniform(1, 0).len(), 1);
    }

    #[test]
    fn buckets() {
        let counts = RangeSet::new(vec![Range::new(0, Some(18)), Range::new(18, None)])
            .bucket_values([3u32, 17, 18, 40, 90]);
        assert_eq!(counts.counts(), [2, 3]);
        assert_eq!(counts.total(), 5);

        let counts = RangeSet::new(vec![Range::new(0u32, Some(18)), Range::new(18, None)])
            .bucket_values_with_missing([Some(3u32), None, Some(20), None]);
        let display: Vec<_> = counts
            .for_display()
            .map(|(label, count)| (label.to_string(), count))
            .collect();
        assert_eq!(
            display,
            [
                ("0 - 18".to_string(), 1),
                ("18+".to_string(), 1),
                ("missing data".to_string(), 2)
            ]
        );
    }
}
