pub mod config;
pub mod lifecycle;
pub mod session;
pub mod status;
pub mod store;
pub mod wait;

pub use session::{Observation, RecognitionSession};
pub use status::{RecognitionStatus, StatusMessage};
pub use store::{ConfigStore, StoreError, StoreResult};
