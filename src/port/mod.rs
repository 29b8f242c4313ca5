//! Port abstraction layer.
//!
//! Capability contracts for the physical link, the tokio-serial
//! implementation, an in-memory mock for tests, and the periodic port lister.

pub mod error;
pub mod lister;
pub mod mock;
pub mod serial;
pub mod traits;

pub use error::PortError;
pub use lister::{
    PortEnumerator, PortFilter, PortInfo, PortListHandle, PortLister, PortSnapshot,
    SystemPortEnumerator,
};
pub use mock::{MockLinkHandle, MockTransport, OpenAttempt, OpenBehavior};
pub use serial::{SerialLink, TokioSerialTransport};
pub use traits::{Link, Transport};
