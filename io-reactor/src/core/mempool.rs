//!
//! Thread safe memory pool backed by a preallocated slot array and a
//! lockless free list. This avoids doing memory allocations in the hot
//! path.
//!
//! Borrowed elements are accounted for and validated upon freeing.

use std::{cell::UnsafeCell, mem::MaybeUninit};

use crossbeam::queue::ArrayQueue;

pub struct MemoryPool<T> {
    name: String,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    free: ArrayQueue<usize>,
    capacity: u64,
}

unsafe impl<T: Send> Send for MemoryPool<T> {}
unsafe impl<T: Send> Sync for MemoryPool<T> {}

impl<T> MemoryPool<T> {
    /// Create memory pool with given name and size.
    pub fn create(name: &str, size: u64) -> Option<Self> {
        if size == 0 {
            error!("Failed to create memory pool '{}': zero capacity", name);
            return None;
        }

        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || {
            UnsafeCell::new(MaybeUninit::uninit())
        });

        let free = ArrayQueue::new(size as usize);
        for index in 0 .. size as usize {
            // the queue was sized to hold every slot
            free.push(index).ok();
        }

        info!(
            "Memory pool '{}' with {} elements ({} bytes size) successfully created",
            name,
            size,
            std::mem::size_of::<T>()
        );
        Some(Self {
            name: String::from(name),
            slots: slots.into_boxed_slice(),
            free,
            capacity: size,
        })
    }

    /// Get free element from memory pool and initialize memory with target
    /// object.
    pub fn get(&self, val: T) -> Option<*mut T> {
        let index = self.free.pop()?;
        let ptr = self.slots[index].get() as *mut T;

        unsafe {
            ptr.write(val);
        }

        Some(ptr)
    }

    /// Return allocated element to memory pool. The caller must have
    /// exclusive access to the element.
    pub fn put(&self, ptr: *mut T) {
        let index = self.index_of(ptr);

        unsafe {
            std::ptr::drop_in_place(ptr);
        }

        if self.free.push(index).is_err() {
            panic!("double free in memory pool '{}'", self.name);
        }
    }

    /// number of elements currently inside the pool
    pub fn free_count(&self) -> u64 {
        self.free.len() as u64
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn index_of(&self, ptr: *mut T) -> usize {
        let base = self.slots.as_ptr() as usize;
        let offset = (ptr as usize).checked_sub(base).unwrap_or_else(|| {
            panic!("pointer does not belong to memory pool '{}'", self.name)
        });

        let size = std::mem::size_of::<T>();
        assert_eq!(
            offset % size,
            0,
            "misaligned pointer returned to memory pool '{}'",
            self.name
        );

        let index = offset / size;
        assert!(
            index < self.capacity as usize,
            "pointer does not belong to memory pool '{}'",
            self.name
        );
        index
    }
}

impl<T> Drop for MemoryPool<T> {
    fn drop(&mut self) {
        let available = self.free_count();
        debug!(
            "Dropping memory pool '{}', elements placement (t/u/f): {}/{}/{}",
            self.name,
            self.capacity,
            self.capacity - available,
            available
        );
        assert_eq!(available, self.capacity);
        info!(
            "Memory pool '{}' with {} elements successfully freed",
            self.name, self.capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_put_accounting() {
        let pool = MemoryPool::<u64>::create("test_pool", 4).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.free_count(), pool.capacity());

        let a = pool.get(1).unwrap();
        let b = pool.get(2).unwrap();
        assert_eq!(pool.free_count(), 2);
        assert_eq!(unsafe { *a }, 1);
        assert_eq!(unsafe { *b }, 2);

        pool.put(a);
        pool.put(b);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = MemoryPool::<u64>::create("tiny_pool", 2).unwrap();
        let a = pool.get(1).unwrap();
        let b = pool.get(2).unwrap();
        assert!(pool.get(3).is_none());

        pool.put(a);
        let c = pool.get(4).unwrap();
        pool.put(b);
        pool.put(c);
    }

    #[test]
    fn zero_capacity_is_refused() {
        assert!(MemoryPool::<u64>::create("empty_pool", 0).is_none());
    }

    #[test]
    fn elements_are_reused_in_place() {
        let pool = MemoryPool::<u64>::create("reuse_pool", 1).unwrap();
        let a = pool.get(1).unwrap();
        pool.put(a);
        let b = pool.get(2).unwrap();
        assert_eq!(a, b);
        pool.put(b);
    }
}
