//! Minimal wire-level HTTP pieces.
//!
//! The application-level pipeline is a collaborator, not part of this
//! crate; what lives here is the little HTTP the acceptor itself must
//! speak: the synthesized 500 response written on unrecoverable faults,
//! and a bounded request-head reader good enough to resolve routing.

pub mod request;
pub mod response;
pub mod worker;

pub use request::{read_request_head, RequestHead};
pub use response::{error_response, send_error_response};
pub use worker::HttpWorkerFactory;
