//! Channel pipeline - detector and lap timer on separate tasks.
//!
//! ```text
//! ┌──────────────┐   mpsc<DetectionFrame>   ┌──────────────────────┐
//! │  producer    │ ───────────────────────► │  consumer            │
//! │  (Oracle)    │      bounded, FIFO       │  RaceSession::ingest │
//! └──────────────┘                          └──────────────────────┘
//! ```
//!
//! The single consumer keeps the race single-writer; FIFO delivery keeps
//! frames in timestamp order.

use crate::context::SimClock;
use crate::oracle::Oracle;
use crate::runner::ScenarioMetrics;

use finishline_core::{RaceSession, RaceSnapshot};
use finishline_env::DetectionSource;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a pipeline run produced.
#[derive(Debug)]
pub struct PipelineReport {
    /// Frames consumed
    pub frames: u64,

    pub metrics: ScenarioMetrics,

    /// Race state after the last frame
    pub snapshot: RaceSnapshot,

    /// The oracle, returned by the producer for ground-truth checks
    pub oracle: Oracle,
}

/// Pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Producer task failed: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

/// Streams `frames` oracle frames through a bounded channel into `session`.
///
/// The session must already be running; its clock is moved to each frame's
/// timestamp before the frame is ingested.
pub async fn run_channel_pipeline(
    mut oracle: Oracle,
    session: &mut RaceSession<SimClock>,
    frames: u64,
    frame_interval: f64,
    capacity: usize,
) -> Result<PipelineReport, PipelineError> {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    oracle.set_frame_interval(frame_interval);

    let producer = tokio::spawn(async move {
        for _ in 0..frames {
            let frame = match oracle.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Detector failed, producer stopping: {}", e);
                    break;
                }
            };
            if tx.send(frame).await.is_err() {
                debug!("Consumer gone, producer stopping");
                break;
            }
        }
        oracle
    });

    let clock = session.context().clone();
    let mut metrics = ScenarioMetrics::default();
    let mut consumed = 0;

    while let Some(frame) = rx.recv().await {
        clock.set_secs(frame.timestamp);
        metrics.detections += frame.len() as u64;
        for outcome in session.ingest_frame(&frame) {
            metrics.record(&outcome);
        }
        consumed += 1;
    }

    let oracle = producer.await?;
    info!(
        "Pipeline drained {} frames: {} laps, {} lap starts",
        consumed, metrics.laps, metrics.lap_starts
    );

    Ok(PipelineReport {
        frames: consumed,
        metrics,
        snapshot: session.snapshot(),
        oracle,
    })
}
