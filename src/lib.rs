pub mod config;
pub mod engine;
pub mod error;
pub mod invoker;
#[cfg(feature = "tch-backend")]
pub mod model;
pub mod params;
pub mod response;
pub mod server;

pub use config::AppConfig;
pub use engine::{CancelFlag, EngineError, GenerationEngine, GenerationSettings, ModelIdentity};
pub use error::ServiceError;
pub use invoker::{GenerationInvoker, GenerationResult};
pub use params::GenerationRequest;
pub use server::build_router;
