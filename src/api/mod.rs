//! Public device API.
//!
//! [`Device`] is what callers use. [`Socket`] is the contract each kernel
//! backend fulfils; only one backend is compiled per target.

mod device;
mod interface;
mod socket;

pub use device::{Device, Writer};
pub(crate) use interface::{Admission, encode_name};
pub use interface::{FRAME_OVERHEAD, Flags, FrameFilter, IFNAMSIZ, Interface};
pub use socket::{FrameWriter, Socket};

pub type Result<T> = std::result::Result<T, crate::errors::Error>;
