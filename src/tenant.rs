use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::engine::{Clock, Engine};
use crate::limits::*;
use crate::notify::NotifyHub;

/// Per-tenant engines, created lazily on first use. Each tenant owns its
/// engine, WAL file, event hub and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    clock: Option<Clock>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            clock: None,
        }
    }

    /// Engines created by this manager read time from `clock`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Tenant ids become file names: keep only `[A-Za-z0-9_-]`.
    pub fn sanitize(tenant: &str) -> io::Result<String> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        let safe: String = tenant
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }
        Ok(safe)
    }

    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let name = Self::sanitize(tenant)?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }

        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The entry lock serializes concurrent first requests for one tenant.
        // Nothing below may touch other shards of `engines` while it is held.
        let vacant = match self.engines.entry(name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(vacant) => vacant,
        };

        let wal_path = self.data_dir.join(format!("{name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(match &self.clock {
            Some(clock) => Engine::with_clock(wal_path, notify, clock.clone())?,
            None => Engine::new(wal_path, notify)?,
        });

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        vacant.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant = %name, "tenant loaded");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
