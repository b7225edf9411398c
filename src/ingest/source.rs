use crate::ingest::Observation;
use std::io::BufRead;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineStats {
    pub accepted: u64,
    pub skipped: u64,
}

/// Read NDJSON observations from `reader` and push them into `tx`.
///
/// Blank lines are ignored and malformed ones logged and skipped. Stops at
/// EOF or when the receiving side has gone away.
pub async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Observation>) -> std::io::Result<LineStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = LineStats::default();
    let mut line_no: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let Some(obs) = parse(&line, line_no, &mut stats) else {
            continue;
        };
        if tx.send(obs).await.is_err() {
            debug!(line_no, "Processor closed, stopping input");
            break;
        }
        stats.accepted += 1;
    }

    Ok(stats)
}

/// Blocking twin of [`forward_lines`] for readers that cannot be cancelled,
/// such as stdin. Run it on its own thread, never on the runtime.
pub fn forward_lines_blocking<R>(reader: R, tx: mpsc::Sender<Observation>) -> std::io::Result<LineStats>
where
    R: BufRead,
{
    let mut stats = LineStats::default();
    let mut line_no: u64 = 0;

    for line in reader.lines() {
        let line = line?;
        line_no += 1;
        let Some(obs) = parse(&line, line_no, &mut stats) else {
            continue;
        };
        if tx.blocking_send(obs).is_err() {
            debug!(line_no, "Processor closed, stopping input");
            break;
        }
        stats.accepted += 1;
    }

    Ok(stats)
}

fn parse(line: &str, line_no: u64, stats: &mut LineStats) -> Option<Observation> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match Observation::parse_line(line) {
        Ok(obs) => Some(obs),
        Err(e) => {
            warn!(line_no, error = %e, "Skipping malformed observation");
            stats.skipped += 1;
            None
        }
    }
}
