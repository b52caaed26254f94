//! Client library for Sony's SDIO vendor extension to PTP/IP.
//!
//! Four layers, leaves first: [`codec`] builds and reads wire packets,
//! [`transport`] frames bytes from two TCP connections, [`session`] runs
//! the handshake and correlates operations, and [`device`] is the typed
//! surface most callers want.
//!
//! ```no_run
//! use sdio_ptpip::Device;
//!
//! # fn main() -> sdio_ptpip::Result<()> {
//! let mut camera = Device::connect("192.168.122.1")?;
//! let settings = camera.get_settings()?;
//! println!("ISO {}", settings.iso);
//! camera.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod device;
pub mod error;
pub mod packet;
pub mod property;
pub mod session;
pub mod transport;

pub use device::{Device, Settings};
pub use error::{CodecError, PtpError, Result};
pub use property::PropertyDescriptor;
pub use session::Config;
