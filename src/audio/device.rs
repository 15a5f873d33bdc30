//! Blocking device interfaces the pipeline talks to.
//!
//! Opening a device is the constructor of the implementing type; closing
//! is `Drop`. Both traits are called from a blocking thread, never from
//! inside an async task.

use std::time::Duration;

use crate::error::Result;

pub trait CaptureDevice: Send {
    /// Block until `buf` is completely filled with S16LE audio.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Current capture latency reported by the device.
    fn latency(&self) -> Result<Duration>;

    /// Stop the stream, letting the driver finish what it holds.
    fn drain(&mut self) -> Result<()>;
}

pub trait PlaybackDevice: Send {
    /// Block until all of `buf` (S16LE) has been accepted by the device.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Block until queued audio has been played.
    fn drain(&mut self) -> Result<()>;
}

impl<T: CaptureDevice + ?Sized> CaptureDevice for Box<T> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }

    fn latency(&self) -> Result<Duration> {
        (**self).latency()
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }
}

impl<T: PlaybackDevice + ?Sized> PlaybackDevice for Box<T> {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all(buf)
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }
}
