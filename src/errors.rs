use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid interface name: {0:?}")]
    InvalidInterfaceName(String),
    #[error("ioctl {request} failed: {source}")]
    Ioctl {
        request: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("no capture device could be opened: {0}")]
    NoCaptureDevice(#[source] io::Error),
    #[error("frame too large ({len}); max frame size: {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("buffer length [{len}] is smaller than required header length [{required}]")]
    BufferTooSmall { len: usize, required: usize },
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },
    #[error("device is closed")]
    Closed,
    #[error("malformed capture record at offset {offset}")]
    MalformedCapture { offset: usize },
}

impl From<nix::Error> for Error {
    fn from(errno: nix::Error) -> Self {
        Error::Io(io::Error::from(errno))
    }
}

impl Error {
    pub(crate) fn ioctl(request: &'static str, errno: nix::Error) -> Self {
        Error::Ioctl {
            request,
            source: io::Error::from(errno),
        }
    }
}
