/*!
# Helios DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le test de la couche de synchronisation Helios avec:
- Backend EMS simulé (REST) avec injection d'échecs
- Canal live simulé piloté depuis le test
- Helpers pour les messages push et objets REST
- Faux serveur EMS HTTP + WebSocket pour les clients réels
- Harness de session complet
*/

pub mod backend_stub;
pub mod fake_server;
pub mod live_stub;
pub mod message_builders;
pub mod test_utils;

pub use backend_stub::{BackendCall, MockBackend, TEST_TOKEN};
pub use fake_server::FakeEmsServer;
pub use live_stub::MockLiveTransport;
pub use message_builders::EmsMessageBuilder;
pub use test_utils::TestHarness;
