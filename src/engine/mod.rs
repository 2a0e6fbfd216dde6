//! Resource registry and reservation engine.
//!
//! Locking discipline: there are two levels of exclusive sections, the
//! registry section (`Engine::registry`) and one section per resource
//! (the `RwLock` around each `ResourceState`). The registry section is
//! always entered first and the resource section second, never the
//! reverse. Resource sections are only reachable through a `Registry`
//! guard, so the order is fixed by construction: see [`Engine::with_resource`].
//! No I/O happens while either section is held; broadcast fan-out runs
//! after both are released.

mod conflict;
mod error;
mod mutations;
mod queries;
mod state;

pub use error::{EngineError, ErrorKind};

pub(crate) use conflict::now_ms;

use std::collections::HashMap;
use std::str::FromStr;

use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::command::CommandKind;
use crate::limits::*;
use crate::model::*;
use crate::notify::{self, ClientHandle};

/// What happens to an intent lock once its hold window has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockExpiryPolicy {
    /// The window is display metadata only; the lock is held until the
    /// client reserves or unlocks.
    #[default]
    Advisory,
    /// A lock past its window is treated as free by `lock` and released by
    /// the reaper.
    Enforced,
}

impl FromStr for LockExpiryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(LockExpiryPolicy::Advisory),
            "enforced" => Ok(LockExpiryPolicy::Enforced),
            other => Err(format!("unknown lock expiry policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Length of the hold window recorded on a new intent lock.
    pub lock_window_ms: Ms,
    pub lock_expiry: LockExpiryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_window_ms: DEFAULT_LOCK_WINDOW_MS,
            lock_expiry: LockExpiryPolicy::Advisory,
        }
    }
}

/// Result of a successful mutation: the reservation (or lock) it touched
/// and the notification to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub reservation: ReservationInfo,
    pub event: Event,
    /// An expired lock this change released on the way, broadcast ahead of
    /// `event`.
    pub expired: Option<Event>,
}

impl Change {
    /// Notifications in broadcast order.
    pub fn events(self) -> impl Iterator<Item = Event> {
        self.expired.into_iter().chain(std::iter::once(self.event))
    }
}

/// Tables guarded by the registry section.
struct Registry {
    resources: HashMap<Ulid, RwLock<ResourceState>>,
    /// Resource ids in creation order, for stable listings.
    order: Vec<Ulid>,
    clients: HashMap<ClientName, ClientHandle>,
    commands: HashMap<String, CommandKind>,
}

pub struct Engine {
    registry: RwLock<Registry>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: RwLock::new(Registry {
                resources: HashMap::new(),
                order: Vec::new(),
                clients: HashMap::new(),
                commands: HashMap::new(),
            }),
            config,
        }
    }

    // ── Resource table ───────────────────────────────────────

    /// Create a resource with a fresh id. Names are not deduplicated.
    pub async fn add_resource(&self, name: impl Into<String>) -> Result<Ulid, EngineError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        let mut registry = self.registry.write().await;
        if registry.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let id = Ulid::new();
        registry
            .resources
            .insert(id, RwLock::new(ResourceState::new(id, name.clone())));
        registry.order.push(id);
        drop(registry);
        info!("added resource {name} ({id})");
        Ok(id)
    }

    /// Enter the registry section, locate `resource_id`, enter its section
    /// exclusively and run `f`. Both sections are released on return.
    pub(super) async fn with_resource<R>(
        &self,
        resource_id: Ulid,
        f: impl FnOnce(&mut ResourceState) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let registry = self.registry.read().await;
        let rs = registry
            .resources
            .get(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let mut guard = rs.write().await;
        f(&mut guard)
    }

    /// Shared-access counterpart of [`Engine::with_resource`] over every
    /// resource, visited in creation order.
    pub(super) async fn read_each_resource<R>(
        &self,
        mut f: impl FnMut(&ResourceState) -> Option<R>,
    ) -> Vec<R> {
        let registry = self.registry.read().await;
        let mut out = Vec::with_capacity(registry.order.len());
        for id in &registry.order {
            if let Some(rs) = registry.resources.get(id) {
                let guard = rs.read().await;
                if let Some(r) = f(&guard) {
                    out.push(r);
                }
            }
        }
        out
    }

    // ── Command table ────────────────────────────────────────

    /// Register `keyword`. The first registration wins; registering an
    /// existing keyword again is a no-op. Returns whether it was inserted.
    pub async fn add_command(&self, keyword: &str, kind: CommandKind) -> bool {
        let mut registry = self.registry.write().await;
        if registry.commands.contains_key(keyword) {
            debug!("command {keyword} already registered");
            return false;
        }
        registry.commands.insert(keyword.to_string(), kind);
        true
    }

    /// Register `help_<keyword>`.
    pub async fn add_help_command(&self, keyword: &str, kind: CommandKind) -> bool {
        self.add_command(&format!("help_{keyword}"), kind).await
    }

    pub async fn command(&self, keyword: &str) -> Option<CommandKind> {
        self.registry.read().await.commands.get(keyword).copied()
    }

    /// All registered keywords, sorted.
    pub async fn commands(&self) -> Vec<(String, CommandKind)> {
        let registry = self.registry.read().await;
        let mut all: Vec<(String, CommandKind)> = registry
            .commands
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    // ── Client table ─────────────────────────────────────────

    /// Register a connected client. A client already registered under the
    /// same name is replaced and returned.
    pub async fn add_client(&self, handle: ClientHandle) -> Option<ClientHandle> {
        let mut registry = self.registry.write().await;
        registry.clients.insert(handle.name.clone(), handle)
    }

    /// Remove `name` if it is still registered by connection `conn_id`.
    pub async fn remove_client(&self, name: &ClientName, conn_id: Ulid) -> bool {
        let mut registry = self.registry.write().await;
        match registry.clients.get(name) {
            Some(handle) if handle.conn_id == conn_id => {
                registry.clients.remove(name);
                true
            }
            _ => false,
        }
    }

    pub async fn client_count(&self) -> usize {
        self.registry.read().await.clients.len()
    }

    /// Best-effort fan-out of `text` to every registered client. The client
    /// table is snapshotted and the registry section released before any
    /// delivery. Returns the number of clients the message was queued for.
    pub async fn broadcast(&self, text: &str) -> usize {
        let recipients: Vec<ClientHandle> = {
            let registry = self.registry.read().await;
            registry.clients.values().cloned().collect()
        };
        notify::fan_out(&recipients, text)
    }
}
