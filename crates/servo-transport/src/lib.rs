//! servo-transport: driver abstractions for serial servo buses
//!
//! This crate defines the capability interface every servo protocol family implements
//! ([`ServoDriver`]) together with feature-gated backends. The default build enables a
//! `mock` backend so that binaries and tests run on any host without a bus attached; the
//! `serial` feature adds Feetech SC/ST codecs over a real UART.

mod types;
pub use types::{BusAddress, BusInfo, ConfigRegister, FieldKind, BROADCAST_ADDRESS};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::ServoDriver;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{Arrival, BusCall, MockBus, MockDriver, MockOp, MockServo};

#[cfg(feature = "serial")]
mod feetech;

#[cfg(feature = "serial")]
pub use feetech::{ScsDriver, SerialLine, SharedLine, StsDriver};
