use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::IngestCounters;
use crate::bus::Publish;
use crate::codec::{decode_line, Transport};

/// Read tagged reading lines from `reader` until EOF or cancellation.
///
/// Lines without the tag are ordinary console noise and only counted at
/// debug level. Invalid UTF-8 is replaced rather than rejected.
pub async fn read_lines<R>(
    ctx: CancellationToken,
    mut reader: R,
    tag: &str,
    bus: &impl Publish,
    counters: &IngestCounters,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();

        let n = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read.context("reading serial line")?,
        };

        if n == 0 {
            debug!("serial stream ended");
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        match decode_line(line, tag) {
            Some(record) => {
                debug!(line, record = %record, "decoded serial line");
                counters.accepted(Transport::Serial);
                bus.emit(record);
            }
            None => {
                if line.contains(tag) {
                    debug!(line, "malformed tagged serial line");
                    counters.rejected(Transport::Serial, None);
                }
            }
        }
    }
}

#[cfg(feature = "serial")]
pub use port::SerialReader;

#[cfg(feature = "serial")]
mod port {
    use anyhow::{Context, Result};
    use tokio::io::BufReader;
    use tokio_serial::{SerialPortBuilderExt, SerialStream};
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    use super::read_lines;
    use crate::bus::Publish;
    use crate::transport::IngestCounters;

    /// Line reader over a serial console.
    pub struct SerialReader {
        stream: SerialStream,
        counters: IngestCounters,
    }

    impl SerialReader {
        pub fn open(port: &str, baud_rate: u32, counters: IngestCounters) -> Result<Self> {
            info!(port, baud_rate, "opening serial port");

            let stream = tokio_serial::new(port, baud_rate)
                .open_native_async()
                .with_context(|| format!("opening serial port {port}"))?;

            Ok(Self { stream, counters })
        }

        /// Forward tagged lines until cancelled. The port is closed when
        /// this returns.
        pub async fn run(self, ctx: CancellationToken, tag: &str, bus: &impl Publish) -> Result<()> {
            let reader = BufReader::new(self.stream);
            read_lines(ctx, reader, tag, bus, &self.counters).await
        }
    }
}
