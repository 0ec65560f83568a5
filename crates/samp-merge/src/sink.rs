//! Consumers of the merged stream.

use samp_core::{Sample, SampleError};

/// Receives merged samples in ascending key order.
///
/// `receive` borrows the sample; a sink that needs to keep it clones it,
/// which retains the shared payload rather than copying it.
pub trait SampleSink {
    /// Accept one sample. An error aborts the merge run.
    fn receive(&mut self, sample: &Sample) -> Result<(), SampleError>;

    /// Flush and close. Called once, after the last sample.
    fn finish(&mut self) -> Result<(), SampleError> {
        Ok(())
    }
}

/// Collects every sample. Holding them keeps their buffers out of the pool.
impl SampleSink for Vec<Sample> {
    fn receive(&mut self, sample: &Sample) -> Result<(), SampleError> {
        self.push(sample.clone());
        Ok(())
    }
}

/// Counts samples and bytes, keeping nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountingSink {
    /// Samples received.
    pub samples: u64,
    /// Payload bytes received.
    pub bytes: u64,
}

impl SampleSink for CountingSink {
    fn receive(&mut self, sample: &Sample) -> Result<(), SampleError> {
        self.samples += 1;
        self.bytes += sample.length() as u64;
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn receive(&mut self, sample: &Sample) -> Result<(), SampleError> {
        (**self).receive(sample)
    }

    fn finish(&mut self) -> Result<(), SampleError> {
        (**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samp_core::{BufferPool, SampleKind};

    #[test]
    fn test_vec_sink_retains_shared_payload() {
        let pool = BufferPool::new();
        let sample = samp_core::acquire(&pool, SampleKind::Char, 3).unwrap().freeze();

        let mut sink: Vec<Sample> = Vec::new();
        sink.receive(&sample).unwrap();
        drop(sample);
        assert_eq!(pool.total_out(), 1);

        sink.clear();
        assert_eq!(pool.total_out(), 0);
    }

    #[test]
    fn test_counting_sink() {
        let sample =
            Sample::from_vec(0, samp_core::SampleId::new(1, 1), SampleKind::Char, vec![0; 7]).unwrap();
        let mut sink = CountingSink::default();
        sink.receive(&sample).unwrap();
        sink.receive(&sample).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink, CountingSink { samples: 2, bytes: 14 });
    }
}
