//! HTTP middleware stack.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request span with method, uri, status, latency)
//! 3. Request ID (recorded on the request span, echoed in the response)
//!
//! Authentication is not a layer: handlers take a [`BearerToken`] and pass it
//! to the tenant gate along with the tenant named in the path.

pub mod auth;
pub mod request_id;

pub use auth::BearerToken;
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
