//! Event Sources

use capture::{Device, HandshakeLines};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Anything the dispatcher can drain records from and send run commands to
pub trait EventSource: Send {
    /// Non-blocking read of whole records; 0 when nothing is available
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send a run command (`b"1"` or `b"0"`)
    fn write(&mut self, cmd: &[u8]) -> io::Result<usize>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, cmd: &[u8]) -> io::Result<usize> {
        (**self).write(cmd)
    }
}

impl<L: HandshakeLines> EventSource for Device<L> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Device::read(self, buf))
    }

    fn write(&mut self, cmd: &[u8]) -> io::Result<usize> {
        Ok(Device::write(self, cmd))
    }
}

/// Capture device exposed by a kernel driver as a character device
pub struct CharDevice {
    file: File,
    path: PathBuf,
}

impl CharDevice {
    /// Open read/write in non-blocking mode
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)?;
        info!("Opened capture device {}", path.display());
        Ok(Self { file, path })
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for CharDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, cmd: &[u8]) -> io::Result<usize> {
        let n = self.file.write(cmd)?;
        self.file.flush()?;
        Ok(n)
    }
}
