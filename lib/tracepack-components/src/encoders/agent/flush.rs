use tracing::debug;

/// Default soft limit on the size of a pending payload, in bytes.
pub(super) const DEFAULT_SOFT_LIMIT_BYTES: usize = 8 * 1024 * 1024;

/// A signal that the pending payload should be flushed.
///
/// Encoders raise this signal, synchronously and from within [`encode`][super::TraceEncoder::encode], once the data
/// they have accumulated grows past their soft limit. The signal is advisory: encoding continues normally, and the
/// receiver decides when to actually make and send the payload.
///
/// The encoder is mutably borrowed while the signal is raised, so receivers must defer the flush itself, for example by
/// setting a flag or notifying a task.
pub trait FlushSignal: Send {
    /// Requests a flush.
    fn flush(&mut self);
}

impl<F> FlushSignal for F
where
    F: FnMut() + Send,
{
    fn flush(&mut self) {
        self()
    }
}

/// A flush signal that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFlush;

impl FlushSignal for NoopFlush {
    fn flush(&mut self) {}
}

/// Raises a flush signal once the accumulated data exceeds a size limit.
///
/// The signal is raised at most once between resets.
pub(super) struct SoftLimit {
    limit_bytes: usize,
    signal: Box<dyn FlushSignal>,
    raised: bool,
}

impl SoftLimit {
    pub(super) fn new(limit_bytes: usize, signal: Box<dyn FlushSignal>) -> Self {
        Self {
            limit_bytes,
            signal,
            raised: false,
        }
    }

    pub(super) fn set_limit_bytes(&mut self, limit_bytes: usize) {
        self.limit_bytes = limit_bytes;
    }

    pub(super) fn check(&mut self, trace_bytes: usize, string_bytes: usize) {
        if self.raised || (trace_bytes <= self.limit_bytes && string_bytes <= self.limit_bytes) {
            return;
        }

        debug!(
            trace_bytes,
            string_bytes,
            limit_bytes = self.limit_bytes,
            "Soft payload size limit exceeded. Requesting flush."
        );
        self.raised = true;
        self.signal.flush();
    }

    pub(super) fn reset(&mut self) {
        self.raised = false;
    }
}

impl std::fmt::Debug for SoftLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftLimit")
            .field("limit_bytes", &self.limit_bytes)
            .field("raised", &self.raised)
            .finish_non_exhaustive()
    }
}
