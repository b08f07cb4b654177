use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;

/// In-memory writer shared between a sink and its reader.
#[derive(Clone, Default, Debug)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn append(&self, buf: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.append(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copy `reader` into `sink` until end of file.
///
/// Every chunk is flushed before the next read, so callers streaming into a
/// terminal or socket see output as commands produce it.
pub(crate) fn forward<R, W>(mut reader: R, sink: W) -> JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Send + 'static,
{
    let mut sink = SyncIoBridge::new(Box::pin(sink));
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            sink.write_all(&buf[..n])?;
            sink.flush()?;
        }
    })
}

/// Error text without the `(os error N)` suffix, as shells print it.
pub(crate) fn describe_io_error(err: &io::Error) -> String {
    let text = err.to_string();
    match text.find(" (os error") {
        Some(i) => text[..i].to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_collects_writes_from_clones() {
        let buf = SharedBuffer::default();
        let mut other = buf.clone();
        buf.clone().write_all(b"hello ").unwrap();
        other.write_all(b"world").unwrap();
        assert_eq!(buf.to_string_lossy(), "hello world");
        assert_eq!(buf.take(), b"hello world".to_vec());
        assert!(buf.contents().is_empty());
    }

    #[tokio::test]
    async fn forward_copies_until_writer_closes() {
        let (reader, mut writer) = io::pipe().unwrap();
        let buf = SharedBuffer::default();
        let task = forward(reader, buf.clone());

        writer.write_all(b"first ").unwrap();
        writer.write_all(b"second").unwrap();
        drop(writer);

        task.await.unwrap().unwrap();
        assert_eq!(buf.to_string_lossy(), "first second");
    }

    #[tokio::test]
    async fn forward_delivers_before_end_of_file() {
        let (reader, mut writer) = io::pipe().unwrap();
        let buf = SharedBuffer::default();
        let task = forward(reader, buf.clone());

        writer.write_all(b"early").unwrap();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while buf.contents().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(buf.to_string_lossy(), "early");
        assert!(!task.is_finished());

        drop(writer);
        task.await.unwrap().unwrap();
    }

    #[test]
    fn io_error_text_drops_os_code() {
        let err = io::Error::from_raw_os_error(2);
        assert!(!describe_io_error(&err).contains("os error"));
        let custom = io::Error::other("boom");
        assert_eq!(describe_io_error(&custom), "boom");
    }
}
