//! Out-of-band chassis control
//!
//! Drives a chassis's management controller (IPMI) to change power state and
//! boot device, then confirms the physical state actually changed: the
//! controller acknowledges a command before the chassis has finished acting
//! on it.

pub mod driver;
pub mod error;
pub mod mock;
pub mod runner;

pub use driver::{BootDevice, PowerDriver, PowerDriverConfig};
pub use error::{PowerError, PowerResult};
pub use mock::MockRunner;
pub use runner::{CommandRunner, IpmitoolConfig, IpmitoolRunner};
