use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{LedgerBackend, StorageError, StoreStatus, VerificationRecord};

/// In-process ledger store.
///
/// Clones share the same records, so a test can keep a handle after moving a
/// clone into the ledger writer, inspect what was persisted and inject
/// read/write failures or slow writes.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    shared: Arc<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Mutex<Vec<VerificationRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing records.
    pub fn with_records(records: Vec<VerificationRecord>) -> Self {
        let backend = Self::default();
        *backend.lock_records() = records;
        backend
    }

    /// Records as last persisted.
    pub fn records(&self) -> Vec<VerificationRecord> {
        self.lock_records().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every persist.
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<VerificationRecord>> {
        self.shared
            .records
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

impl LedgerBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&mut self) -> Result<Vec<VerificationRecord>, StorageError> {
        if self.shared.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected read failure".to_string()));
        }
        Ok(self.records())
    }

    fn persist(
        &mut self,
        records: &[VerificationRecord],
        _changed: usize,
    ) -> Result<(), StorageError> {
        let delay = self.shared.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected write failure".to_string()));
        }
        *self.lock_records() = records.to_vec();
        Ok(())
    }

    fn status(&self) -> StoreStatus {
        StoreStatus::new(self.name())
    }
}
