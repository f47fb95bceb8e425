//! Load-ordered proxy pool.
//!
//! A binary min-heap keyed on each proxy's assigned-client count, with a
//! position index so a proxy can be found and removed by address. The load
//! counter is advisory: nothing here caps how many clients a proxy serves.

use crate::core::proxy::Proxy;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug)]
struct Slot {
    proxy: Arc<Proxy>,
    load: u32,
}

/// Min-priority collection of proxies ordered by assigned load.
#[derive(Debug, Default)]
pub struct ProxyPool {
    heap: Vec<Slot>,
    positions: HashMap<IpAddr, usize>,
}

impl ProxyPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.positions.contains_key(&addr)
    }

    /// Current load of the proxy at `addr`, if pooled here.
    #[must_use]
    pub fn load_of(&self, addr: IpAddr) -> Option<u32> {
        self.positions.get(&addr).map(|&i| self.heap[i].load)
    }

    /// Adds a proxy with an initial load. A proxy already pooled under the
    /// same address is replaced and returned.
    pub fn insert(&mut self, proxy: Arc<Proxy>, load: u32) -> Option<Arc<Proxy>> {
        let replaced = self.remove(proxy.addr).map(|(old, _)| old);
        let idx = self.heap.len();
        self.positions.insert(proxy.addr, idx);
        self.heap.push(Slot { proxy, load });
        self.sift_up(idx);
        replaced
    }

    /// Takes the least-loaded proxy out of the pool.
    pub fn pop_least_loaded(&mut self) -> Option<(Arc<Proxy>, u32)> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let slot = self.heap.pop()?;
        self.positions.remove(&slot.proxy.addr);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some((slot.proxy, slot.load))
    }

    /// Puts a popped proxy back with its load bumped by one.
    pub fn reinsert_after_increment(&mut self, proxy: Arc<Proxy>, load: u32) {
        self.insert(proxy, load.saturating_add(1));
    }

    /// Pop, increment, reinsert: hands out the least-loaded proxy while
    /// keeping it available for later matches.
    pub fn borrow_least_loaded(&mut self) -> Option<Arc<Proxy>> {
        let (proxy, load) = self.pop_least_loaded()?;
        self.reinsert_after_increment(Arc::clone(&proxy), load);
        Some(proxy)
    }

    /// Removes the proxy at `addr`, returning it with its load.
    pub fn remove(&mut self, addr: IpAddr) -> Option<(Arc<Proxy>, u32)> {
        let idx = *self.positions.get(&addr)?;
        let last = self.heap.len() - 1;
        self.swap(idx, last);
        let slot = self.heap.pop()?;
        self.positions.remove(&slot.proxy.addr);
        if idx < self.heap.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some((slot.proxy, slot.load))
    }

    /// Gives back one unit of load. Returns false if `addr` is not pooled
    /// here or its load is already zero.
    pub fn release(&mut self, addr: IpAddr) -> bool {
        let Some(&idx) = self.positions.get(&addr) else {
            return false;
        };
        if self.heap[idx].load == 0 {
            return false;
        }
        self.heap[idx].load -= 1;
        self.sift_up(idx);
        true
    }

    /// Pooled proxies with their loads, in heap order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Proxy>, u32)> {
        self.heap.iter().map(|s| (&s.proxy, s.load))
    }

    /// True when every parent's load is at most its children's.
    #[must_use]
    pub fn is_heap_ordered(&self) -> bool {
        (1..self.heap.len()).all(|i| self.heap[(i - 1) / 2].load <= self.heap[i].load)
            && self
                .heap
                .iter()
                .enumerate()
                .all(|(i, s)| self.positions.get(&s.proxy.addr) == Some(&i))
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].proxy.addr, a);
        self.positions.insert(self.heap[b].proxy.addr, b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[parent].load <= self.heap[idx].load {
                break;
            }
            self.swap(parent, idx);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.heap[left].load < self.heap[smallest].load {
                smallest = left;
            }
            if right < len && self.heap[right].load < self.heap[smallest].load {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }
}
