//! Error types for XY-SKxxx communications.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Failure modes of a bus transaction or value conversion.
///
/// The driver never panics; every fallible operation surfaces one of these.
/// Transient variants (`Timeout`, `InvalidResponse`, `Serial`) are what the
/// retry policy in [`psu`](crate::psu) absorbs before giving up.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("serial communication error")]
    Serial(I),
    #[error("modbus protocol error: {0}")]
    Modbus(rmodbus::ErrorKind),
    #[error("no response before timeout")]
    Timeout,
    #[error("invalid response received")]
    InvalidResponse,
    #[error("frame buffer overflow")]
    BufferOverflow,
    #[error("value out of register range")]
    OutOfRange,
}

impl<I: embedded_io::Error> From<rmodbus::ErrorKind> for Error<I> {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Error::Modbus(err)
    }
}
