use super::traits::{PolicyHint, ReadError, RemoteReader, RequestClient, SendError, ServerStatus};
use crate::model::{Color, Coord, Operation, Region};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct GridState {
    cells: HashMap<Coord, Color>,
    /// Failures keyed by 1-based send number.
    scripted: HashMap<u64, SendError>,
    /// Failure returned for every send from this number on.
    fail_from: Option<(u64, SendError)>,
    /// Keys whose writes are acknowledged but never land.
    silent_drops: Vec<Coord>,
    balance: Option<u64>,
    hint: Option<PolicyHint>,
}

/// In-process stand-in for the remote grid, with scriptable failures.
#[derive(Debug, Default)]
pub struct MemoryGrid {
    state: Mutex<GridState>,
    sends: AtomicU64,
    reads: AtomicU64,
    latency: Duration,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, GridState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the `nth` send (1-based) with `error`.
    pub fn fail_on(&self, nth: u64, error: SendError) {
        self.lock().scripted.insert(nth, error);
    }

    /// Fail every send from the `nth` on with `error`.
    pub fn fail_from(&self, nth: u64, error: SendError) {
        self.lock().fail_from = Some((nth, error));
    }

    /// Acknowledge writes to `key` without applying them.
    pub fn drop_silently(&self, key: Coord) {
        self.lock().silent_drops.push(key);
    }

    pub fn set_cell(&self, key: Coord, color: Color) {
        self.lock().cells.insert(key, color);
    }

    pub fn cell(&self, key: Coord) -> Option<Color> {
        self.lock().cells.get(&key).copied()
    }

    pub fn set_balance(&self, balance: Option<u64>) {
        self.lock().balance = balance;
    }

    pub fn set_policy_hint(&self, hint: Option<PolicyHint>) {
        self.lock().hint = hint;
    }

    pub fn send_count(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestClient for MemoryGrid {
    async fn send(&self, op: &Operation) -> Result<(), SendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.lock();

        if let Some(error) = state.scripted.remove(&n) {
            return Err(error);
        }
        if let Some((from, error)) = &state.fail_from {
            if n >= *from {
                return Err(error.clone());
            }
        }
        if !state.silent_drops.contains(&op.key) {
            state.cells.insert(op.key, op.payload);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl RemoteReader for MemoryGrid {
    async fn read_region(&self, region: Region) -> Result<HashMap<Coord, Color>, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .cells
            .iter()
            .filter(|(key, _)| region.contains(**key))
            .map(|(key, color)| (*key, *color))
            .collect())
    }
}

#[async_trait]
impl ServerStatus for MemoryGrid {
    async fn balance(&self) -> Option<u64> {
        self.lock().balance
    }

    async fn policy_hint(&self) -> Option<PolicyHint> {
        self.lock().hint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failure_only_hits_nth_send() {
        let grid = MemoryGrid::new();
        grid.fail_on(2, SendError::RateLimited);
        let op = Operation::new(Coord::new(1, 1), Color(4));

        assert!(grid.send(&op).await.is_ok());
        assert_eq!(grid.send(&op).await, Err(SendError::RateLimited));
        assert!(grid.send(&op).await.is_ok());
        assert_eq!(grid.send_count(), 3);
        assert_eq!(grid.cell(op.key), Some(Color(4)));
    }

    #[tokio::test]
    async fn test_silent_drop_acknowledges_without_writing() {
        let grid = MemoryGrid::new();
        let op = Operation::new(Coord::new(5, 5), Color(9));
        grid.drop_silently(op.key);

        assert!(grid.send(&op).await.is_ok());
        assert_eq!(grid.cell(op.key), None);
    }

    #[tokio::test]
    async fn test_read_region_filters_cells() {
        let grid = MemoryGrid::new();
        grid.set_cell(Coord::new(1, 1), Color(1));
        grid.set_cell(Coord::new(15, 1), Color(2));

        let cells = grid.read_region(Region::covering(Coord::new(0, 0), 10)).await.unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells.get(&Coord::new(1, 1)), Some(&Color(1)));
        assert_eq!(grid.read_count(), 1);
    }
}
