/*!
# NetKeep DevKit - Shell simulé et harness de test

Bibliothèque facilitant les tests du kernel sans SSH ni réseau:
- `MockShell`: executor scripté par host et par commande
- `ShellFixtures`: sorties réalistes de docker, virsh, ip, tmux
- `StaticProbe`: sonde ICMP déterministe
- `TestHarness`: un `NetKeep` complet câblé sur les mocks
*/

pub mod fixtures;
pub mod mock_shell;
pub mod test_utils;

pub use fixtures::{ContainerFixture, ShellFixtures};
pub use mock_shell::{MockCall, MockShell};
pub use test_utils::{init_tracing, StaticProbe, TestHarness};
