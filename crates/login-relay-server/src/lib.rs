//! login-relay HTTP server
//!
//! Accepts login form POSTs, forwards each one to the authentication backend
//! as a single `LOGIN` command and answers with the backend's reply.

pub mod error;
pub mod routes;
