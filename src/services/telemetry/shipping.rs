//! Remote log shipping.
//!
//! Events are formatted as JSON lines by a regular `tracing_subscriber::fmt` layer
//! whose writer hands each line to a background task. The task batches lines and
//! posts them to the bulk ingestion endpoint.
//!
//! Flush policy: every `buffer_size` entries, or every `flush_interval`, whichever
//! comes first. Delivery failures (including posts that exceed `request_timeout`)
//! are logged on the process-level subscriber and the batch is dropped.
//!
//! The queue between the writer and the task holds at most `queue_capacity` lines.
//! When it is full, new lines are dropped and counted instead of blocking the
//! request path.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

use crate::services::telemetry::TelemetryError;

pub const LOGGLY_BUFFER_SIZE: usize = 10;
pub const LOGGLY_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
pub const SHIPPING_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const SHIPPING_QUEUE_CAPACITY: usize = 10_000;

const LOGGLY_BULK_URL: &str = "https://logs-01.loggly.com/bulk";

#[derive(Clone, Debug)]
pub struct ShippingConfig {
    pub endpoint: String,
    pub buffer_size: usize,
    pub flush_interval: Duration,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
}

impl ShippingConfig {
    /// Bulk endpoint for `token`, tagged with the account `subdomain`.
    pub fn loggly(token: &str, subdomain: &str) -> Self {
        Self {
            endpoint: format!("{}/{}/tag/{}/", LOGGLY_BULK_URL, token, subdomain),
            buffer_size: LOGGLY_BUFFER_SIZE,
            flush_interval: LOGGLY_FLUSH_INTERVAL,
            request_timeout: SHIPPING_REQUEST_TIMEOUT,
            queue_capacity: SHIPPING_QUEUE_CAPACITY,
        }
    }
}

/// Handle to the background shipping task. Cheap to clone.
///
/// The task stops once every handle (and every writer) is dropped, after a final
/// flush.
#[derive(Clone, Debug)]
pub struct LogShipper {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicUsize>,
}

impl LogShipper {
    /// Spawn the shipping task on the current tokio runtime.
    pub fn spawn(config: ShippingConfig) -> Result<Self, TelemetryError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| TelemetryError::NoRuntime)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TelemetryError::Client(e.to_string()))?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shipper = Self::from_sender(tx);
        handle.spawn(run(client, config, rx, shipper.dropped.clone()));

        Ok(shipper)
    }

    /// Build a shipper over an existing channel. Lines are never sent anywhere;
    /// the receiver sees exactly what would have been posted.
    pub fn from_sender(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lines dropped so far because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, line: String) {
        match self.tx.try_send(line) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // The task is gone; nothing to do.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

async fn run(
    client: reqwest::Client,
    config: ShippingConfig,
    mut rx: mpsc::Receiver<String>,
    dropped: Arc<AtomicUsize>,
) {
    let mut buffer: Vec<String> = Vec::with_capacity(config.buffer_size);
    let mut reported_dropped = 0;
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    buffer.push(line);
                    if buffer.len() >= config.buffer_size {
                        flush(&client, &config.endpoint, &mut buffer).await;
                    }
                }
                None => {
                    flush(&client, &config.endpoint, &mut buffer).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                flush(&client, &config.endpoint, &mut buffer).await;

                let total = dropped.load(Ordering::Relaxed);
                if total > reported_dropped {
                    tracing::warn!(dropped = total - reported_dropped, "log shipping queue full");
                    reported_dropped = total;
                }
            }
        }
    }
}

async fn flush(client: &reqwest::Client, endpoint: &str, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }

    let body = buffer.join("\n");
    let count = buffer.len();
    buffer.clear();

    let result = client
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, "text/plain")
        .body(body)
        .send()
        .await
        .and_then(|res| res.error_for_status());

    if let Err(err) = result {
        tracing::warn!(error = %err, dropped = count, "log shipping failed");
    }
}

impl<'a> MakeWriter<'a> for LogShipper {
    type Writer = ShipperWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ShipperWriter {
            shipper: self.clone(),
            buf: Vec::new(),
        }
    }
}

/// One writer per formatted event; the line is handed off on drop.
pub struct ShipperWriter {
    shipper: LogShipper,
    buf: Vec<u8>,
}

impl io::Write for ShipperWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ShipperWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if !line.is_empty() {
            self.shipper.send(line.to_string());
        }
    }
}
