pub mod client_controller;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod net_client;
pub mod phase;
pub mod session;
pub mod supervisor;
pub mod timer;
pub mod transport;

#[cfg(feature = "native")]
pub mod api;
#[cfg(feature = "native")]
pub mod ws_transport;
