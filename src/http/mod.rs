//! Workflow API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (--listen)
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (x-request-id) + middleware/ (metrics)
//!     → handlers.rs (cache reads, API server writes)
//!     → response.rs (error mapping)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use handlers::{ApiState, WorkflowSummary};
pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use response::ApiError;
pub use server::{RouterError, RouterServer};
