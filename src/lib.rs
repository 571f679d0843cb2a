#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
)))]
compile_error!("Supported targets: linux and android (AF_PACKET), macos, ios and freebsd (BPF).");

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod af_packet;
pub mod api;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub mod bpf;
pub mod buffer_pool;
pub mod capture;
pub mod errors;
pub mod frame;
pub mod io_loop;

pub use api::{Device, Flags, FrameFilter, Interface, Writer};
pub use buffer_pool::{BufferPool, FramePool, TimestampedFrame, TimestampedFramePool};
pub use errors::Error;
pub use frame::{Ethertype, Frame, Tagging};
pub use io_loop::{IoConfig, IoHandle};
