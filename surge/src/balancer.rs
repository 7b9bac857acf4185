use crate::conn::Addr;
use crate::options::LoadBalancing;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks the loop that receives the next accepted connection.
#[derive(Debug)]
pub(crate) struct LoadBalancer {
    strategy: LoadBalancing,
    /// Live connection count per loop, maintained by the loops.
    loads: Arc<[AtomicUsize]>,
    next: usize,
}

impl LoadBalancer {
    pub(crate) fn new(strategy: LoadBalancing, loads: Arc<[AtomicUsize]>) -> Self {
        Self {
            strategy,
            loads,
            next: 0,
        }
    }

    /// Choose a loop among those for which `alive` holds.
    ///
    /// Returns `None` when every loop has stopped.
    pub(crate) fn pick<F: Fn(usize) -> bool>(&mut self, remote: &Addr, alive: F) -> Option<usize> {
        let n = self.loads.len();
        match self.strategy {
            LoadBalancing::RoundRobin => {
                let idx = (0..n).map(|i| (self.next + i) % n).find(|&i| alive(i))?;
                self.next = (idx + 1) % n;
                Some(idx)
            }
            LoadBalancing::LeastConnections => self
                .loads
                .iter()
                .enumerate()
                .filter(|&(idx, _)| alive(idx))
                .min_by_key(|(_, load)| load.load(Ordering::Relaxed))
                .map(|(idx, _)| idx),
            LoadBalancing::SourceAddrHash => {
                let mut hasher = DefaultHasher::new();
                match remote {
                    Addr::Inet(addr) => addr.ip().hash(&mut hasher),
                    Addr::Unix(path) => path.hash(&mut hasher),
                }
                let start = (hasher.finish() % n.max(1) as u64) as usize;
                // next live loop after the hashed one
                (0..n).map(|i| (start + i) % n).find(|&i| alive(i))
            }
        }
    }
}
