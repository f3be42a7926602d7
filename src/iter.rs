use crate::ForkJoinPool;
use crate::error::Result;

pub(crate) struct UnsafeSlice<T> {
    slice: *mut [T],
}

unsafe impl<T: Send> Send for UnsafeSlice<T> {}
unsafe impl<T: Send> Sync for UnsafeSlice<T> {}

impl<T> UnsafeSlice<T> {
    pub(crate) fn new(slice: &mut [T]) -> Self {
        Self {
            slice: slice as *mut [T],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slice.len()
    }

    /// Element `index`, or `None` past the end.
    ///
    /// Safety: Caller must ensure no other thread accesses the same index
    /// while the returned reference is alive.
    pub(crate) unsafe fn get_mut<'a>(&self, index: usize) -> Option<&'a mut T> {
        if index >= self.len() {
            return None;
        }
        Some(unsafe { &mut *(self.slice as *mut T).add(index) })
    }
}

pub trait ParallelSlice<T> {
    fn par_iter<'a>(&'a self, pool: &'a mut ForkJoinPool) -> ParallelIter<'a, T>;
}

pub trait ParallelSliceMut<T> {
    fn par_iter_mut<'a>(&'a mut self, pool: &'a mut ForkJoinPool) -> ParallelIterMut<'a, T>;
}

impl<T: Sync> ParallelSlice<T> for [T] {
    fn par_iter<'a>(&'a self, pool: &'a mut ForkJoinPool) -> ParallelIter<'a, T> {
        ParallelIter { slice: self, pool }
    }
}

impl<T: Send> ParallelSliceMut<T> for [T] {
    fn par_iter_mut<'a>(&'a mut self, pool: &'a mut ForkJoinPool) -> ParallelIterMut<'a, T> {
        ParallelIterMut { slice: self, pool }
    }
}

pub struct ParallelIter<'a, T> {
    slice: &'a [T],
    pool: &'a mut ForkJoinPool,
}

impl<'a, T: Sync> ParallelIter<'a, T> {
    pub fn for_each<F>(self, op: F) -> Result<()>
    where
        F: Fn(&T) + Sync,
    {
        let len = self.slice.len();
        self.pool
            .run_parallel(self.slice, 0..len, |slice, i| op(&slice[i]))
    }
}

pub struct ParallelIterMut<'a, T> {
    slice: &'a mut [T],
    pool: &'a mut ForkJoinPool,
}

impl<'a, T: Send> ParallelIterMut<'a, T> {
    pub fn for_each<F>(self, op: F) -> Result<()>
    where
        F: Fn(&mut T) + Sync,
    {
        self.for_each_indexed(|item, _| op(item))
    }

    pub fn for_each_indexed<F>(self, op: F) -> Result<()>
    where
        F: Fn(&mut T, usize) + Sync,
    {
        let len = self.slice.len();
        let unsafe_slice = UnsafeSlice::new(self.slice);

        self.pool.run_parallel(&unsafe_slice, 0..len, |slice, i| {
            // Safety: partitions are disjoint, so each i is visited by one
            // worker.
            if let Some(item) = unsafe { slice.get_mut(i) } {
                op(item, i);
            }
        })
    }
}
