//! Fixed-size windows over a worklist.
//!
//! Every bulk operation walks its worklist through a [`ChunkPlan`]. Each
//! [`Window`] carries its own base offset, so a call's chunk-relative index
//! maps back to the worklist position without any shared counter.

use crate::crm::config::clamp_batch_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    len: usize,
    size: usize,
}

/// One slice of a worklist: `len` items starting at `base_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: usize,
    pub base_offset: usize,
    pub len: usize,
}

impl ChunkPlan {
    /// Plan `len` items in windows of `requested_size`, clamped to the
    /// remote batch ceiling.
    pub fn new(len: usize, requested_size: usize) -> Self {
        Self {
            len,
            size: clamp_batch_size(requested_size),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_size(&self) -> usize {
        self.size
    }

    pub fn chunk_count(&self) -> usize {
        self.len.div_ceil(self.size)
    }

    pub fn windows(&self) -> impl Iterator<Item = Window> + use<> {
        let len = self.len;
        let size = self.size;
        (0..self.chunk_count()).map(move |index| {
            let base_offset = index * size;
            Window {
                index,
                base_offset,
                len: size.min(len - base_offset),
            }
        })
    }
}

impl Window {
    /// Worklist position of the item at `local_index` within this window.
    pub fn global_index(&self, local_index: usize) -> usize {
        self.base_offset + local_index
    }

    pub fn end(&self) -> usize {
        self.base_offset + self.len
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.base_offset..self.end()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_worklist_in_order_exactly_once() {
        for len in [0usize, 1, 49, 50, 51, 99, 100, 101, 120, 257] {
            for size in [1usize, 7, 20, 50] {
                let plan = ChunkPlan::new(len, size);
                let windows: Vec<Window> = plan.windows().collect();

                assert_eq!(windows.len(), len.div_ceil(size), "len={len} size={size}");
                assert_eq!(windows.iter().map(|w| w.len).sum::<usize>(), len);
                assert!(windows.iter().all(|w| w.len <= size && w.len > 0));

                let items: Vec<usize> = (0..len).collect();
                let rebuilt: Vec<usize> = windows
                    .iter()
                    .flat_map(|w| w.slice(&items).iter().copied())
                    .collect();
                assert_eq!(rebuilt, items);
            }
        }
    }

    #[test]
    fn requested_size_is_clamped() {
        let plan = ChunkPlan::new(120, 500);
        assert_eq!(plan.chunk_size(), 50);
        let sizes: Vec<usize> = plan.windows().map(|w| w.len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);

        assert_eq!(ChunkPlan::new(3, 0).chunk_size(), 1);
    }

    #[test]
    fn global_index_adds_window_offset() {
        let plan = ChunkPlan::new(120, 50);
        let windows: Vec<Window> = plan.windows().collect();

        assert_eq!(windows[0].global_index(0), 0);
        assert_eq!(windows[1].global_index(0), 50);
        assert_eq!(windows[1].global_index(49), 99);
        assert_eq!(windows[2].global_index(19), 119);

        for base_offset in [0usize, 1, 50, 1_000] {
            for local in [0usize, 3, 49] {
                let window = Window {
                    index: 0,
                    base_offset,
                    len: 50,
                };
                assert_eq!(window.global_index(local), base_offset + local);
            }
        }
    }
}
