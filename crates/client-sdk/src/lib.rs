//! Client for the docvault gateway.
//!
//! Keeps the access credential in one [`SessionContext`], attaches it to
//! every call, and when the gateway answers 401 runs at most one refresh
//! for all the requests that hit it before replaying each of them once.

pub mod client;
pub mod error;
pub mod session;
pub mod transport;

pub use client::GatewayClient;
pub use error::ClientError;
pub use session::SessionContext;
pub use transport::{FilePart, HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};

pub use docvault_protocol as protocol;
