//! Inference server access.
//!
//! The orchestration layers talk to the server only through the
//! [`InferenceBackend`] trait; [`InferenceClient`] is the HTTP implementation
//! for LM Studio style `/api/v1` endpoints.
pub mod backend_trait;
pub mod http_client;
pub use backend_trait::{ClientError, InferenceBackend};
pub use http_client::{ClientSettings, InferenceClient};
