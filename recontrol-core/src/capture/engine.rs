//! Screen capture engine.
//!
//! Orchestrates the per-tick pipeline:
//!
//! 1. [`CaptureSource`] acquires a raw frame of the primary display.
//! 2. [`DirtyDetector`] finds and merges changed regions.
//! 3. Policy: ≥50 % changed area collapses to a single full-frame region.
//! 4. [`RegionEncoder`] compresses regions, fanning out across a bounded
//!    pool when there is more than one.
//! 5. Duplicate-batch elision via an order-independent content hash.
//! 6. The complete [`FrameBatch`] is handed to the batch callback.
//!
//! The loop runs in a Tokio task and shuts down cooperatively via a
//! `CancellationToken`; per-tick failures are logged and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capability::CaptureSource;
use crate::capture::delta::DirtyDetector;
use crate::capture::encoder::{FrameBatch, FrameRegion, RegionEncoder};
use crate::capture::types::Rect;
use crate::error::ReconError;

// ── CaptureConfig ────────────────────────────────────────────────

/// Per-stream capture settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Encoder quality slider (1-100).
    pub quality: u8,
    /// Delay between capture ticks.
    pub interval: Duration,
    /// Dirty-grid tile size in pixels.
    pub tile_size: u32,
    /// Capture downscale factor in (0, 1].
    pub downscale: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            quality: 30,
            interval: Duration::from_millis(200),
            tile_size: 32,
            downscale: 1.0,
        }
    }
}

/// How long `stop` waits for the loop to exit before abandoning it.
const STOP_GRACE: Duration = Duration::from_millis(500);

// ── CaptureEngine ────────────────────────────────────────────────

type BatchCallback = Box<dyn Fn(FrameBatch) + Send + Sync>;

/// Idle/Running capture engine over a [`CaptureSource`] and a
/// [`RegionEncoder`].
pub struct CaptureEngine {
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    encoder: Arc<dyn RegionEncoder>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl CaptureEngine {
    pub fn new(source: Box<dyn CaptureSource>, encoder: Arc<dyn RegionEncoder>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            encoder,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Whether the capture loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch the capture loop; a no-op when already running.
    ///
    /// `on_batch` receives each complete tick's batch and must not block;
    /// the transport side hands it a bounded queue push.
    pub fn start(&self, config: CaptureConfig, on_batch: impl Fn(FrameBatch) + Send + Sync + 'static) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("capture engine already running");
            return;
        }

        tracing::info!(
            quality = config.quality,
            interval_ms = config.interval.as_millis() as u64,
            tile_size = config.tile_size,
            downscale = config.downscale,
            "starting capture loop"
        );

        let mut pipeline = TickPipeline::new(
            Arc::clone(&self.source),
            Arc::clone(&self.encoder),
            config.clone(),
            Box::new(on_batch),
        );
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let running = Arc::clone(&self.running);

        // A zero period would panic `interval` inside the task.
        let period = config.interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = pipeline.tick().await {
                    tracing::warn!("capture tick failed: {e}");
                }
            }
            running.store(false, Ordering::SeqCst);
            tracing::info!("capture loop exited");
        });

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        *worker = Some((cancel, handle));
    }

    /// Request cancellation and wait (bounded) for the loop to exit.
    ///
    /// If the loop does not observe cancellation within the grace period it
    /// is aborted, which drops its buffers eagerly.
    pub async fn stop(&self) {
        let taken = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            worker.take()
        };
        let Some((cancel, handle)) = taken else {
            return;
        };

        cancel.cancel();
        let abort = handle.abort_handle();
        if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
            tracing::warn!("capture loop did not stop in time, aborting it");
            abort.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

// ── TickPipeline ─────────────────────────────────────────────────

/// One tick of capture → diff → encode → emit. Owns the previous-frame
/// state; only ever driven by the single capture loop.
struct TickPipeline {
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    encoder: Arc<dyn RegionEncoder>,
    detector: DirtyDetector,
    config: CaptureConfig,
    on_batch: BatchCallback,
    last_hash: Option<u64>,
}

impl TickPipeline {
    fn new(
        source: Arc<Mutex<Box<dyn CaptureSource>>>,
        encoder: Arc<dyn RegionEncoder>,
        config: CaptureConfig,
        on_batch: BatchCallback,
    ) -> Self {
        Self {
            source,
            encoder,
            detector: DirtyDetector::new(config.tile_size),
            config,
            on_batch,
            last_hash: None,
        }
    }

    async fn tick(&mut self) -> Result<(), ReconError> {
        let frame = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            source.capture(self.config.downscale)?
        };
        let frame = Arc::new(frame);

        let regions = self.detector.detect(&frame);
        if regions.is_empty() {
            // No-op frame: nothing changed, nothing emitted.
            return Ok(());
        }

        let total_area = frame.bounds().area();
        let changed_area: u64 = regions.iter().map(Rect::area).sum();

        let encoded = if changed_area * 2 >= total_area {
            // Half the surface or more changed: one full-frame region.
            let rect = frame.bounds();
            let data = self.encoder.encode(&frame, rect, self.config.quality)?;
            vec![FrameRegion {
                data,
                is_full_frame: true,
                rect,
            }]
        } else if regions.len() == 1 {
            let rect = regions[0];
            let data = self.encoder.encode(&frame, rect, self.config.quality)?;
            vec![FrameRegion {
                data,
                is_full_frame: false,
                rect,
            }]
        } else {
            self.encode_parallel(&frame, regions).await?
        };

        // Encoded output can be identical to the previous batch even when
        // the tile diff saw changes (transient/oscillating pixels); elide.
        let hash = batch_hash(&encoded);
        if self.last_hash == Some(hash) {
            tracing::trace!("duplicate batch elided");
            return Ok(());
        }
        self.last_hash = Some(hash);

        (self.on_batch)(FrameBatch::new(encoded));
        Ok(())
    }

    /// Fan region encoding out across at most
    /// `min(available_parallelism, regions)` concurrent tasks and fan back
    /// in, preserving region order.
    async fn encode_parallel(
        &self,
        frame: &Arc<crate::capture::PixelBuffer>,
        regions: Vec<Rect>,
    ) -> Result<Vec<FrameRegion>, ReconError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(regions.len());
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut tasks = Vec::with_capacity(regions.len());
        for rect in regions {
            let semaphore = Arc::clone(&semaphore);
            let frame = Arc::clone(frame);
            let encoder = Arc::clone(&self.encoder);
            let quality = self.config.quality;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ReconError::ChannelClosed)?;
                let data = encoder.encode(&frame, rect, quality)?;
                Ok::<FrameRegion, ReconError>(FrameRegion {
                    data,
                    is_full_frame: false,
                    rect,
                })
            }));
        }

        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let region = task
                .await
                .map_err(|e| ReconError::Encode(format!("encode task: {e}")))??;
            out.push(region);
        }
        Ok(out)
    }
}

/// Order-independent content hash over a region set: per-region blake3 of
/// geometry + encoded bytes, folded to 64 bits and XOR-combined.
fn batch_hash(regions: &[FrameRegion]) -> u64 {
    regions.iter().fold(0u64, |acc, region| {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&region.rect.x.to_le_bytes());
        hasher.update(&region.rect.y.to_le_bytes());
        hasher.update(&region.rect.width.to_le_bytes());
        hasher.update(&region.rect.height.to_le_bytes());
        hasher.update(&[region.is_full_frame as u8]);
        hasher.update(&region.data);
        let digest = hasher.finalize();
        // blake3 digests are 32 bytes.
        let word = u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap());
        acc ^ word
    })
}

// ── Tests ────────────────────────────────────────────────────────
