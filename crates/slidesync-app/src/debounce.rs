//! Trailing debounce.
//!
//! [`Debouncer::spawn`] returns an input handle and an output receiver. A
//! value reaches the output only after `delay` passes with no newer call;
//! bursts collapse to their last value. Dropping every input handle flushes
//! the pending value, if any, and closes the output.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the debounced output channel.
const OUTPUT_CAPACITY: usize = 16;

/// Input side of a trailing debounce.
#[derive(Debug)]
pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn spawn(delay: Duration) -> (Self, mpsc::Receiver<T>) {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (output, output_rx) = mpsc::channel(OUTPUT_CAPACITY);
        let task = tokio::spawn(run_debounce(delay, input_rx, output));
        (Self { input, task }, output_rx)
    }

    /// Schedule `value`, replacing any value still waiting out the delay.
    ///
    /// Returns `false` if the debounce task has stopped.
    pub fn call(&self, value: T) -> bool {
        self.input.send(value).is_ok()
    }

    /// Drop any pending value and stop.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

async fn run_debounce<T>(
    delay: Duration,
    mut input: mpsc::UnboundedReceiver<T>,
    output: mpsc::Sender<T>,
) {
    let mut pending: Option<T> = None;

    loop {
        match pending.take() {
            None => match input.recv().await {
                Some(value) => pending = Some(value),
                None => break,
            },
            Some(value) => {
                tokio::select! {
                    newer = input.recv() => match newer {
                        Some(newer) => pending = Some(newer),
                        None => {
                            let _ = output.send(value).await;
                            break;
                        }
                    },
                    _ = tokio::time::sleep(delay) => {
                        if output.send(value).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
