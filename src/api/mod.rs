pub mod auth;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;

pub use auth::{AuthUser, SessionKeys};
pub use routes::create_router;
pub use state::AppState;
