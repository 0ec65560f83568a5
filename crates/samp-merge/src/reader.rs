//! Pull interface over one sorted sample source.

use samp_core::{Sample, SampleError};
use std::collections::VecDeque;

/// One time-sorted source of samples: a file set, a byte stream, a channel
/// fed by a reader thread, or an in-memory list.
///
/// Sources are "sorted" only approximately. Samples may step backward in
/// time; the merge engine detects and reports that.
pub trait StreamReader: Send {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Next sample, `Ok(None)` at end of stream, or an error that ends this
    /// source. After `Ok(None)` or `Err`, the engine stops calling `read`.
    fn read(&mut self) -> Result<Option<Sample>, SampleError>;
}

impl<R: StreamReader + ?Sized> StreamReader for Box<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self) -> Result<Option<Sample>, SampleError> {
        (**self).read()
    }
}

/// A source backed by samples already in memory.
#[derive(Debug, Clone)]
pub struct VecReader {
    name: String,
    samples: VecDeque<Sample>,
}

impl VecReader {
    /// Serve `samples` in the order given.
    pub fn new(name: impl Into<String>, samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            name: name.into(),
            samples: samples.into_iter().collect(),
        }
    }

    /// Samples not yet read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl StreamReader for VecReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Sample>, SampleError> {
        Ok(self.samples.pop_front())
    }
}
