use log::info;

/// Receives progress events from the controllers. Rendering is entirely up
/// to the implementation; the controllers only report batch boundaries and
/// per-outcome ticks.
pub trait ProgressSink: Send + Sync {
    fn begin(&self, total: usize);
    fn tick(&self);
    fn finish(&self);
}

/// Discards all progress events.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn begin(&self, _total: usize) {}

    fn tick(&self) {}

    fn finish(&self) {}
}

/// Logs batch boundaries, for unattended runs where a live bar is useless.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn begin(&self, total: usize) {
        info!("starting batch of {total}");
    }

    fn tick(&self) {}

    fn finish(&self) {
        info!("batch finished");
    }
}
