//! Client library for JSONL-speaking lab instruments.
//!
//! This crate is a thin layer over the instrument's newline-delimited JSON
//! protocol: endpoint parsing and opening (TCP or USB serial), the
//! request/reply envelope engine, zeroconf discovery on the local network,
//! and the line bridge the web proxy uses.
//!
//! ```no_run
//! # async fn demo() -> tether_core::Result<()> {
//! let mut instrument = tether_core::Controller::connect_to("net://192.168.1.2").await?;
//! let reply = instrument.query("net_status").await?;
//! println!("net_status = {:?}", reply.msg);
//! # Ok(())
//! # }
//! ```

mod bridge;
mod controller;
mod discovery;
mod endpoint;
mod envelope;
mod error;

pub use bridge::bridge;
pub use controller::Controller;
pub use discovery::{Discovery, SERVICE_TYPE};
pub use endpoint::{DEFAULT_PORT, Endpoint, EndpointParseError, InstrumentStream, SERIAL_BAUD};
pub use envelope::{RecvEnvelope, SendEnvelope};
pub use error::{Error, Result};
