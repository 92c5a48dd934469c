//! Live migration between two blackboard backends.
//!
//! `HybridBlackboard` is itself a `BlackboardBackend` wrapping an old and a
//! new backend with a switchable `MigrationMode`. The read side of the
//! current mode is the version authority; in the dual-write modes every
//! write is mirrored to the other backend and awaited, so no
//! transition-period write is lost on the authoritative side. Mirror
//! failures are logged and tolerated: the backend being migrated away from
//! must not take the run down.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::errors::SwarmResult;
use crate::domain::models::blackboard::{
    BlackboardEntry, BlackboardStats, DataCategory, MigrationMode,
};
use crate::domain::ports::BlackboardBackend;

fn mode_to_u8(mode: MigrationMode) -> u8 {
    match mode {
        MigrationMode::WriteOld => 0,
        MigrationMode::DualWriteReadOld => 1,
        MigrationMode::DualWriteReadNew => 2,
    }
}

fn mode_from_u8(raw: u8) -> MigrationMode {
    match raw {
        0 => MigrationMode::WriteOld,
        1 => MigrationMode::DualWriteReadOld,
        _ => MigrationMode::DualWriteReadNew,
    }
}

pub struct HybridBlackboard {
    old: Arc<dyn BlackboardBackend>,
    new: Arc<dyn BlackboardBackend>,
    mode: AtomicU8,
}

impl HybridBlackboard {
    pub fn new(
        old: Arc<dyn BlackboardBackend>,
        new: Arc<dyn BlackboardBackend>,
        mode: MigrationMode,
    ) -> Self {
        Self {
            old,
            new,
            mode: AtomicU8::new(mode_to_u8(mode)),
        }
    }

    /// Switch migration mode at runtime. Takes effect for the next operation.
    pub fn set_mode(&self, mode: MigrationMode) {
        self.mode.store(mode_to_u8(mode), Ordering::Release);
    }

    pub fn mode(&self) -> MigrationMode {
        mode_from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Backend reads are served from under the current mode.
    fn read_side(&self, mode: MigrationMode) -> &Arc<dyn BlackboardBackend> {
        match mode {
            MigrationMode::WriteOld | MigrationMode::DualWriteReadOld => &self.old,
            MigrationMode::DualWriteReadNew => &self.new,
        }
    }

    /// The non-authoritative backend mirrored to in dual-write modes.
    fn mirror_side(&self, mode: MigrationMode) -> Option<&Arc<dyn BlackboardBackend>> {
        match mode {
            MigrationMode::WriteOld => None,
            MigrationMode::DualWriteReadOld => Some(&self.new),
            MigrationMode::DualWriteReadNew => Some(&self.old),
        }
    }
}

#[async_trait]
impl BlackboardBackend for HybridBlackboard {
    async fn write(
        &self,
        key: &str,
        category: DataCategory,
        value: serde_json::Value,
        source: &str,
        ttl: Option<Duration>,
    ) -> SwarmResult<BlackboardEntry> {
        let mode = self.mode();
        let entry = self
            .read_side(mode)
            .write(key, category, value, source, ttl)
            .await?;

        if let Some(mirror) = self.mirror_side(mode) {
            if let Err(err) = mirror.write_at(entry.clone()).await {
                warn!(key, mode = ?mode, error = %err, "mirror blackboard write failed");
            }
        }
        Ok(entry)
    }

    async fn write_at(&self, entry: BlackboardEntry) -> SwarmResult<()> {
        let mode = self.mode();
        self.read_side(mode).write_at(entry.clone()).await?;
        if let Some(mirror) = self.mirror_side(mode) {
            if let Err(err) = mirror.write_at(entry).await {
                warn!(mode = ?mode, error = %err, "mirror blackboard write failed");
            }
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> SwarmResult<Option<BlackboardEntry>> {
        self.read_side(self.mode()).read(key).await
    }

    async fn query(
        &self,
        category: DataCategory,
        limit: usize,
    ) -> SwarmResult<Vec<BlackboardEntry>> {
        self.read_side(self.mode()).query(category, limit).await
    }

    fn subscribe(&self, category: DataCategory) -> broadcast::Receiver<BlackboardEntry> {
        // Subscriptions attach to the current read side; callers re-subscribe
        // after a mode switch.
        self.read_side(self.mode()).subscribe(category)
    }

    async fn cleanup_expired(&self) -> SwarmResult<u64> {
        let mode = self.mode();
        let mut swept = self.read_side(mode).cleanup_expired().await?;
        if let Some(mirror) = self.mirror_side(mode) {
            match mirror.cleanup_expired().await {
                Ok(n) => swept += n,
                Err(err) => warn!(error = %err, "mirror blackboard cleanup failed"),
            }
        }
        Ok(swept)
    }

    async fn stats(&self) -> BlackboardStats {
        self.read_side(self.mode()).stats().await
    }
}
