/// A fixed-size Vec<T> with gaps (meaning some indexes may not have a value)
/// Useful for collecting results that are produced out of order by several workers
pub struct GapVec<T> {
    items: Vec<Option<T>>,
}

impl<T> GapVec<T> {
    /// Create a gap vec with a fixed size
    pub fn new(size: usize) -> Self {
        Self {
            items: std::iter::repeat_with(|| None).take(size).collect(),
        }
    }

    /// Set the value at a provided index
    /// Panics if the index does not exist
    pub fn set(&mut self, index: usize, value: T) {
        self.items[index] = Some(value);
    }

    /// Consume the vec, yielding the present values in index order
    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.items.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::GapVec;

    #[test]
    fn values_come_back_in_index_order() {
        let mut vec = GapVec::new(5);
        vec.set(3, "d");
        vec.set(0, "a");
        vec.set(1, "b");

        assert_eq!(vec.into_values().collect::<Vec<_>>(), ["a", "b", "d"]);
    }

    #[test]
    #[should_panic]
    fn setting_outside_bounds_panics() {
        let mut vec = GapVec::new(1);
        vec.set(1, ());
    }
}
