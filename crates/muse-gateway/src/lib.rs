//! HTTP gateway for the Muse agent.
//!
//! Exposes `POST /agent` (one JSON response per request), `POST /agent/stream`
//! (Server-Sent Events) and `GET /health`.

pub mod handlers;
pub mod server;
pub mod state;

pub use server::{build_router, start_gateway};
pub use state::GatewayState;
