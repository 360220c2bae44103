//! Requests, responses, and the network the agent fetches through.

mod client;
mod request;
mod response;

pub use client::{HttpNetwork, Network};
pub use request::{Destination, Request, RequestKey};
pub use response::Response;

#[cfg(test)]
pub(crate) use client::testing;
