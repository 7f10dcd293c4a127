//! Status API served alongside the web application

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::{AppState, MirrorState, create_router};
