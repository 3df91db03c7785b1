mod auth_extractor;
mod tracing_layer;
mod metrics_layer;

pub use auth_extractor::{decode_claims, encode_claims, encode_claims_for_env};
pub use tracing_layer::*;
pub use metrics_layer::*;
