//! In-memory ledger capturing appended rows for tests and e2e runs.

use super::ledger::{Ledger, LedgerError, MapRow, NoShowRow, SubstitutionRow, WarLockRow};
use crate::domain::WarId;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MockLedger {
    locks: Arc<Mutex<Vec<WarLockRow>>>,
    maps: Arc<Mutex<Vec<MapRow>>>,
    vods: Arc<Mutex<Vec<(WarId, String)>>>,
    subs: Arc<Mutex<Vec<SubstitutionRow>>>,
    no_shows: Arc<Mutex<Vec<NoShowRow>>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> Vec<WarLockRow> {
        self.locks.lock().unwrap().clone()
    }

    pub fn maps(&self) -> Vec<MapRow> {
        self.maps.lock().unwrap().clone()
    }

    pub fn vods(&self) -> Vec<(WarId, String)> {
        self.vods.lock().unwrap().clone()
    }

    pub fn subs(&self) -> Vec<SubstitutionRow> {
        self.subs.lock().unwrap().clone()
    }

    pub fn no_shows(&self) -> Vec<NoShowRow> {
        self.no_shows.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn war_locked(&self, row: WarLockRow) -> Result<(), LedgerError> {
        self.locks.lock().unwrap().push(row);
        Ok(())
    }

    async fn map_recorded(&self, row: MapRow) -> Result<(), LedgerError> {
        self.maps.lock().unwrap().push(row);
        Ok(())
    }

    async fn vod_set(&self, war_id: WarId, vod_url: String) -> Result<(), LedgerError> {
        self.vods.lock().unwrap().push((war_id, vod_url));
        Ok(())
    }

    async fn substitution(&self, row: SubstitutionRow) -> Result<(), LedgerError> {
        self.subs.lock().unwrap().push(row);
        Ok(())
    }

    async fn no_show(&self, row: NoShowRow) -> Result<(), LedgerError> {
        self.no_shows.lock().unwrap().push(row);
        Ok(())
    }
}
