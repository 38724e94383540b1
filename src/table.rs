use std::cmp::min;
use std::ops::Index;

use log::debug;

use crate::error::{Error, Result};
use crate::utils::MyHash;

/// Bucket array never exceeds `2^MAX_BUCKET_BITS` heads.
const MAX_BUCKET_BITS: usize = 20;

#[derive(Clone)]
struct Entry<T> {
    value: T,
    next: usize,
    occupied: bool,
}

impl<T> Default for Entry<T>
where
    T: Default,
{
    fn default() -> Self {
        Self {
            value: T::default(),
            next: 0,
            occupied: false,
        }
    }
}

/// Hash-consing table with chained buckets.
///
/// Index 0 is a sentry and never handed out. The table starts with
/// `2^bits` slots and doubles on demand until it holds `2^max_bits` slots;
/// past that point allocation fails with [`Error::NodeTableExhausted`].
pub struct Table<T> {
    data: Vec<Entry<T>>,

    buckets: Vec<usize>,
    bitmask: u64,

    max_capacity: usize,
    /// Index of the first *possibly* free (non-occupied) cell.
    min_free: usize,
    /// Index of the last occupied cell.
    last_index: usize,
    /// Number of occupied cells.
    real_size: usize,
}

impl<T> Table<T>
where
    T: Default,
{
    /// Create a new table of size `2^bits`, growable up to `2^max_bits`.
    pub fn new(bits: usize, max_bits: usize) -> Self {
        assert!(bits <= 31, "Storage bits should be in the range 0..=31");
        assert!(
            (bits..=31).contains(&max_bits),
            "Maximum storage bits should be in the range {}..=31",
            bits
        );

        let capacity = 1 << bits;
        let mut data: Vec<Entry<T>> = Vec::with_capacity(capacity);
        data.resize_with(capacity, Entry::default);
        data[0].occupied = true; // Set 0th cell as occupied (sentry).

        let buckets_bits = min(bits, MAX_BUCKET_BITS);
        let buckets_size = 1 << buckets_bits;

        Self {
            data,
            buckets: vec![0; buckets_size],
            bitmask: (buckets_size - 1) as u64,
            max_capacity: 1 << max_bits,
            min_free: 1,
            last_index: 0,
            real_size: 0,
        }
    }
}

impl<T> Table<T> {
    /// Get the capacity of the table.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
    /// Get the index of the last occupied cell.
    pub fn size(&self) -> usize {
        self.last_index
    }
    /// Get the number of occupied cells.
    pub fn real_size(&self) -> usize {
        self.real_size
    }

    /// Get the reference to the value at the given index.
    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }

    /// Check if the cell at the given index is occupied.
    pub fn is_occupied(&self, index: usize) -> bool {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].occupied
    }
    /// Get the index of the next cell in the same bucket.
    pub fn next(&self, index: usize) -> usize {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next
    }
    /// Set the index of the next cell in the same bucket.
    pub fn set_next(&mut self, index: usize, next: usize) {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next = next;
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }
    pub fn bucket(&self, i: usize) -> usize {
        self.buckets[i]
    }
    pub fn set_bucket(&mut self, i: usize, index: usize) {
        self.buckets[i] = index;
    }

    /// Drop the value at the given index.
    pub fn drop(&mut self, index: usize) {
        assert_ne!(index, 0, "Index is 0");
        assert!(self.data[index].occupied, "Cell {} is not occupied", index);

        self.data[index].occupied = false;
        self.data[index].next = 0;
        self.min_free = min(self.min_free, index);
        self.real_size -= 1;
        while self.last_index > 0 && !self.data[self.last_index].occupied {
            self.last_index -= 1;
        }
    }
}

impl<T> Table<T>
where
    T: Default + MyHash,
{
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Double the number of slots (and buckets, while allowed) or fail at max capacity.
    fn grow(&mut self) -> Result<()> {
        let capacity = self.capacity();
        if capacity >= self.max_capacity {
            return Err(Error::NodeTableExhausted { capacity });
        }
        let new_capacity = min(capacity * 2, self.max_capacity);
        debug!("table: growing from {} to {} slots", capacity, new_capacity);
        self.data.resize_with(new_capacity, Entry::default);

        if self.buckets.len() < (1 << MAX_BUCKET_BITS) && self.buckets.len() < new_capacity {
            let buckets_size = self.buckets.len() * 2;
            self.buckets = vec![0; buckets_size];
            self.bitmask = (buckets_size - 1) as u64;
            for index in 1..=self.last_index {
                if self.data[index].occupied {
                    let b = self.bucket_index(&self.data[index].value);
                    self.data[index].next = self.buckets[b];
                    self.buckets[b] = index;
                }
            }
        }
        Ok(())
    }

    /// Allocate a new cell in the table and return its index.
    pub(crate) fn alloc(&mut self) -> Result<usize> {
        let free = (self.min_free..=self.last_index).find(|&i| !self.data[i].occupied);
        let index = match free {
            Some(index) => index,
            None => {
                if self.last_index + 1 >= self.capacity() {
                    self.grow()?;
                }
                self.last_index += 1;
                self.last_index
            }
        };

        self.data[index].occupied = true;
        self.min_free = index + 1;
        self.real_size += 1;

        Ok(index)
    }

    /// Add a new value to the table and return its index.
    fn add(&mut self, value: T) -> Result<usize> {
        let index = self.alloc()?;

        self.data[index].value = value;
        self.data[index].next = 0;

        Ok(index)
    }

    /// Put a value into the table, returning the index of the (possibly pre-existing) equal value.
    pub fn put(&mut self, value: T) -> Result<usize>
    where
        T: Eq,
    {
        let bucket_index = self.bucket_index(&value);
        let mut index = self.buckets[bucket_index];

        while index != 0 {
            if &value == self.value(index) {
                return Ok(index);
            }
            index = self.next(index);
        }

        // Not found: allocate, then push to the front of the (possibly rehashed) bucket.
        let i = self.add(value)?;
        let bucket_index = self.bucket_index(&self.data[i].value);
        self.data[i].next = self.buckets[bucket_index];
        self.buckets[bucket_index] = i;
        Ok(i)
    }
}

impl<T> Index<usize> for Table<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.value(index)
    }
}
