//! Byte-stream transports for the link.
//!
//! A [`Connector`] opens a (reader, writer) pair for a port and baud rate.
//! [`SerialConnector`] drives a tty; tests plug in in-memory pipes.

use super::LinkError;
use nix::fcntl::OFlag;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
};
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the byte stream to the motion controller.
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        port: &str,
        baud: u32,
    ) -> impl Future<Output = Result<(BoxReader, BoxWriter), LinkError>> + Send;
}

/// Raw 8N1 tty via termios.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    async fn open(&self, port: &str, baud: u32) -> Result<(BoxReader, BoxWriter), LinkError> {
        let path = port.to_string();
        let file = tokio::task::spawn_blocking(move || open_tty(&path, baud))
            .await
            .map_err(|e| LinkError::Io(e.to_string()))??;
        let read_half = file.try_clone()?;
        debug!(port, baud, "Serial port configured");
        Ok((
            Box::new(TtyReader {
                inner: tokio::fs::File::from_std(read_half),
            }),
            Box::new(tokio::fs::File::from_std(file)),
        ))
    }
}

fn baud_rate(baud: u32) -> Result<BaudRate, LinkError> {
    Ok(match baud {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        other => return Err(LinkError::UnsupportedBaud(other)),
    })
}

/// Open `path` and configure it raw, 8N1, no flow control.
///
/// VMIN=0 / VTIME=1: reads return after 100 ms with whatever arrived,
/// possibly nothing.
fn open_tty(path: &str, baud: u32) -> Result<File, LinkError> {
    let rate = baud_rate(baud)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NOCTTY.bits())
        .open(path)?;

    let mut tio = termios::tcgetattr(&file)?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, rate)?;
    tio.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CSIZE);
    tio.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
    tio.control_flags &= !ControlFlags::CRTSCTS;
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;
    termios::tcsetattr(&file, SetArg::TCSANOW, &tio)?;
    termios::tcflush(&file, FlushArg::TCIOFLUSH)?;
    Ok(file)
}

/// A tty read that returns zero bytes means "nothing yet", not end of
/// stream. Re-arm instead of surfacing it as EOF.
struct TtyReader {
    inner: tokio::fs::File,
}

impl AsyncRead for TtyReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let before = buf.filled().len();
            match Pin::new(&mut self.inner).poll_read(cx, buf) {
                Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                    continue;
                }
                other => return other,
            }
        }
    }
}

impl From<nix::Error> for LinkError {
    fn from(e: nix::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}
