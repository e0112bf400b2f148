use std::sync::atomic::{AtomicU64, Ordering};

#[non_exhaustive]
pub struct Metrics {
    pub rings_created: u64,
    pub rings_destroyed: u64,
}

pub(crate) struct MetricsStorage {
    pub(crate) rings_created: AtomicU64,
    pub(crate) rings_destroyed: AtomicU64,
}

impl MetricsStorage {
    pub(crate) const fn new_const() -> Self {
        MetricsStorage {
            rings_created: AtomicU64::new(0),
            rings_destroyed: AtomicU64::new(0),
        }
    }

    fn make_pub(&self) -> Metrics {
        Metrics {
            rings_created: self.rings_created.load(Ordering::Relaxed),
            rings_destroyed: self.rings_destroyed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) static GLOBAL_STORAGE: MetricsStorage = MetricsStorage::new_const();

pub fn global() -> Metrics {
    GLOBAL_STORAGE.make_pub()
}
