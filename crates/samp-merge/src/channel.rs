//! Readers on their own threads, feeding the merge loop through bounded
//! channels.
//!
//! ```text
//! reader thread ──blocking_send──> mpsc(capacity) ──blocking_recv──> engine thread
//! ```
//!
//! The producing thread decodes and allocates samples from the shared pool;
//! the engine thread consumes and eventually releases them. A full channel
//! blocks the producer, which bounds how far any reader can run ahead.

use samp_core::{Sample, SampleError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::reader::StreamReader;

/// What a reader thread sends.
enum Message {
    Sample(Sample),
    End,
    Failed(SampleError),
}

/// A [`StreamReader`] whose reads are served by another thread.
pub struct ThreadedReader {
    name: String,
    rx: mpsc::Receiver<Message>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl ThreadedReader {
    /// Move `reader` onto a new thread that reads ahead up to `capacity`
    /// samples.
    pub fn spawn<R>(reader: R, capacity: usize) -> std::io::Result<Self>
    where
        R: StreamReader + 'static,
    {
        let name = reader.name().to_string();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = std::thread::Builder::new()
            .name(format!("reader-{name}"))
            .spawn(move || produce(reader, tx))?;
        Ok(Self {
            name,
            rx,
            handle: Some(handle),
            finished: false,
        })
    }
}

fn produce<R: StreamReader>(mut reader: R, tx: mpsc::Sender<Message>) {
    let mut sent = 0u64;
    loop {
        let message = match reader.read() {
            Ok(Some(sample)) => Message::Sample(sample),
            Ok(None) => Message::End,
            Err(e) => Message::Failed(e),
        };
        let terminal = !matches!(message, Message::Sample(_));
        if tx.blocking_send(message).is_err() {
            debug!(stream = %reader.name(), sent, "Reader channel closed by consumer");
            return;
        }
        if terminal {
            debug!(stream = %reader.name(), sent, "Reader thread finished");
            return;
        }
        sent += 1;
    }
}

impl StreamReader for ThreadedReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Sample>, SampleError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.blocking_recv() {
            Some(Message::Sample(sample)) => Ok(Some(sample)),
            Some(Message::End) => {
                self.finished = true;
                Ok(None)
            }
            Some(Message::Failed(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Err(SampleError::source_io(
                    self.name.clone(),
                    std::io::Error::other("reader thread exited without end of stream"),
                ))
            }
        }
    }
}

impl Drop for ThreadedReader {
    fn drop(&mut self) {
        // Unblock a producer waiting on a full channel, then wait for it.
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(stream = %self.name, "Reader thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ThreadedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedReader")
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish()
    }
}
