pub mod error;
pub mod orchestrator;
pub mod secrets;
pub mod supervisor;

pub use error::{AuthError, AuthResult};
pub use orchestrator::{AttemptSettings, CredentialOrchestrator, OrchestratorState};
pub use supervisor::{LaunchMode, ProcessHandle, ProcessSupervisor, RecognizerLauncher};
