/**
 * HELIOS SYNC - Couche de synchronisation temps réel du client EMS
 *
 * RÔLE : Maintient un canal live unique vers le backend, fusionne les événements
 * push, les snapshots REST et les mutations optimistes en un état client cohérent.
 *
 * ARCHITECTURE : ConnectionManager + SnapshotPoller produisent, EventDispatcher et
 * ActionCoordinator appliquent, ReconciledStore publie, SyncSession orchestre.
 * UTILITÉ : Noyau partagé par la console opérateur et les tests d'intégration.
 */

pub mod actions;
pub mod api;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod persist;
pub mod poller;
pub mod store;
pub mod transport;

pub use actions::{ActionCoordinator, OptimisticCommand, Resolution};
pub use api::{EmsBackend, HttpBackend};
pub use config::{load_config, SyncConfig};
pub use connection::{ConnectionManager, ReconnectPolicy};
pub use dispatcher::{DispatchOutcome, EventDispatcher, InboundFrame, SiteEvent};
pub use error::SyncError;
pub use health::{SyncHealth, SyncHealthTracker};
pub use lifecycle::{SessionSignal, SyncSession};
pub use models::{
    Alert, ConnectionStatus, Credential, HealthStatus, RlStrategy, Scope, Site, SiteId, Suggestion,
    SuggestionAction, SuggestionStatus, Telemetry,
};
pub use persist::{ClientStateStore, FileStateStore, MemoryStateStore, PersistedKey};
pub use poller::SnapshotPoller;
pub use store::{Epoch, Freshness, ReconciledStore, StoreView};
pub use transport::{FrameStream, LiveTransport, WsTransport};
