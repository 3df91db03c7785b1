pub mod api;
pub mod auth;
pub mod event;
pub mod ids;

pub use api::*;
pub use auth::*;
pub use event::*;
pub use ids::*;
