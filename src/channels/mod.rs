//! Provider transports.
//!
//! A transport turns one long-lived page connection into a [`ProviderPort`].

pub mod port;
pub mod web;

pub use port::ProviderPort;
