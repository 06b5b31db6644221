#[cfg(test)] use mockall::automock;
use tracing::debug;

/// Receives progress notifications during a transfer. `total` is known for uploads from a file
///  and unknown on the receiving side.
#[cfg_attr(test, automock)]
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, done: u64, total: Option<u64>);

    fn on_finished(&self, done: u64);
}

/// Default listener: progress goes to the debug log
pub struct LogProgress;

impl ProgressListener for LogProgress {
    fn on_progress(&self, done: u64, total: Option<u64>) {
        match percentage(done, total) {
            Some(percent) => debug!("transferred {} bytes ({:.2}%)", done, percent),
            None => debug!("transferred {} bytes", done),
        }
    }

    fn on_finished(&self, done: u64) {
        debug!("transfer finished after {} bytes", done);
    }
}

pub fn percentage(done: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(0) => Some(100.0),
        Some(total) => Some(done as f64 * 100.0 / total as f64),
        None => None,
    }
}
