//! Acquisition pipeline
//!
//! Wires the simulated digitizer through the post-mortem buffer, the
//! optional decimating re-timer and the trigger extractor:
//!
//! ```text
//! source -> post-mortem sink -> [tag re-timer] -> trigger extractor -> windows
//! ```
//!
//! [`Pipeline`] processes one chunk per [`Pipeline::step`] on the caller's
//! thread. [`PipelineHandle`] runs the same loop on a dedicated worker thread
//! and delivers windows over a bounded channel.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runtime::StageRunner;
use crate::stages::{
    DropReason, ExtractedWindow, ExtractorStats, PostMortemSink, ReTimerStats, SimulatedDigitizer,
    TagReTimer, TriggerExtractor, WindowSpec,
};
use crate::stats::StatsStore;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Single-threaded acquisition pipeline
pub struct Pipeline {
    config: PipelineConfig,
    spec: WindowSpec,
    source: SimulatedDigitizer,
    post_mortem: StageRunner<PostMortemSink>,
    retimer: Option<StageRunner<TagReTimer>>,
    extractor: StageRunner<TriggerExtractor>,
    sink: PostMortemSink,
    stats: Arc<Mutex<StatsStore>>,
    last_extractor: ExtractorStats,
    last_retimer: ReTimerStats,
}

impl Pipeline {
    /// Build a pipeline with its own statistics store
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_stats(config, Arc::new(Mutex::new(StatsStore::new())))
    }

    /// Build a pipeline recording into an existing statistics store
    pub fn with_stats(
        config: PipelineConfig,
        stats: Arc<Mutex<StatsStore>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let spec = config.window_spec()?;
        let chunk = config.chunk_size;

        let start_timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let source = SimulatedDigitizer::new(config.sample_rate, chunk)
            .with_signal(config.signal_frequency, config.amplitude)
            .with_noise(config.noise_amplitude)
            .with_trigger_period(config.trigger_period)
            .with_start_timestamp(start_timestamp)
            .with_errors(config.with_errors);

        let sink = PostMortemSink::new(
            config.post_mortem_capacity,
            config.signal_name.clone(),
            config.unit.clone(),
        )?;
        let post_mortem = StageRunner::new(sink.clone(), chunk, chunk)?;

        let decimation = config.effective_decimation();
        let retimer = if decimation > 1 {
            Some(StageRunner::new(TagReTimer::new(decimation), chunk, chunk)?)
        } else {
            None
        };

        let extractor = TriggerExtractor::new(spec, config.history)?;
        let extractor = StageRunner::new(extractor, chunk, chunk.max(spec.window_len()))?;

        tracing::info!(
            sample_rate = config.sample_rate,
            chunk_size = chunk,
            decimation,
            pre_trigger = spec.pre_trigger,
            post_trigger = spec.post_trigger,
            post_mortem_capacity = config.post_mortem_capacity,
            "Pipeline configured"
        );

        Ok(Self {
            config,
            spec,
            source,
            post_mortem,
            retimer,
            extractor,
            sink,
            stats,
            last_extractor: ExtractorStats::default(),
            last_retimer: ReTimerStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Reader handle to the post-mortem buffer
    pub fn post_mortem(&self) -> PostMortemSink {
        self.sink.clone()
    }

    pub fn stats(&self) -> Arc<Mutex<StatsStore>> {
        Arc::clone(&self.stats)
    }

    pub fn extractor_stats(&self) -> ExtractorStats {
        self.extractor.stage().stats()
    }

    pub fn retimer_stats(&self) -> Option<ReTimerStats> {
        self.retimer.as_ref().map(|r| r.stage().stats())
    }

    /// Process one source chunk and return the windows it completed
    pub fn step(&mut self) -> Vec<ExtractedWindow> {
        let chunk = self.source.next_chunk();
        let samples = chunk.len();

        let mut stream = self.post_mortem.process(chunk);
        if let Some(retimer) = self.retimer.as_mut() {
            stream = retimer.process(stream);
        }
        let output = self.extractor.process(stream);
        let windows = ExtractedWindow::from_chunk(&output, self.spec);

        self.record(samples, &windows);
        windows
    }

    fn record(&mut self, samples: usize, windows: &[ExtractedWindow]) {
        let dropped = self.extractor.stage_mut().take_dropped();
        let extractor = self.extractor.stage().stats();
        let retimer = self.retimer_stats().unwrap_or_default();

        let malformed_triggers = dropped
            .iter()
            .filter(|d| d.reason == DropReason::MalformedPayload)
            .count() as u64;
        let rejected = extractor.payloads_rejected - self.last_extractor.payloads_rejected;

        if let Ok(mut store) = self.stats.lock() {
            store.record_chunk(samples);
            for window in windows {
                store.record_window(window);
            }
            for drop in &dropped {
                store.record_drop(drop.offset, drop.reason);
            }
            store.record_triggers_detected(
                extractor.triggers_detected - self.last_extractor.triggers_detected,
            );
            store.record_rejected(rejected.saturating_sub(malformed_triggers));
            store.record_merged(retimer.acq_infos_merged - self.last_retimer.acq_infos_merged);
        }

        self.last_extractor = extractor;
        self.last_retimer = retimer;
    }
}

/// Handle to a pipeline running on its own thread
///
/// Dropping the handle stops the thread.
pub struct PipelineHandle {
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    steps: Arc<AtomicU64>,
    thread: Option<std::thread::JoinHandle<()>>,
    windows: Receiver<ExtractedWindow>,
    sink: PostMortemSink,
    stats: Arc<Mutex<StatsStore>>,
    spec: WindowSpec,
}

impl PipelineHandle {
    /// Validate `config` and start the pipeline thread
    pub fn spawn(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::spawn_with_stats(config, Arc::new(Mutex::new(StatsStore::new())))
    }

    /// Start the pipeline thread recording into an existing statistics store
    pub fn spawn_with_stats(
        config: PipelineConfig,
        stats: Arc<Mutex<StatsStore>>,
    ) -> Result<Self, PipelineError> {
        let pipeline = Pipeline::with_stats(config, stats)?;
        let (tx, rx) = crossbeam_channel::bounded(pipeline.config().window_queue);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let steps = Arc::new(AtomicU64::new(0));
        let sink = pipeline.post_mortem();
        let stats = pipeline.stats();
        let spec = pipeline.spec();

        let flag_clone = Arc::clone(&stop_flag);
        let running_clone = Arc::clone(&running);
        let steps_clone = Arc::clone(&steps);
        let thread = std::thread::Builder::new()
            .name("digitizer-pipeline".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    run_loop(pipeline, tx, flag_clone, steps_clone);
                }));
                match result {
                    Ok(()) => tracing::info!("Pipeline thread exited normally"),
                    Err(panic_info) => {
                        let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        tracing::error!(panic = %msg, "Pipeline thread PANICKED");
                    }
                }
                running_clone.store(false, Ordering::Release);
            })?;

        Ok(Self {
            stop_flag,
            running,
            steps,
            thread: Some(thread),
            windows: rx,
            sink,
            stats,
            spec,
        })
    }

    /// Stop the pipeline thread and wait for it to finish
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }

    /// Check if the pipeline thread is still alive
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Flag cleared by the pipeline thread when it exits, normally or not
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Chunks processed so far
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Receiver of extracted windows
    pub fn windows(&self) -> Receiver<ExtractedWindow> {
        self.windows.clone()
    }

    pub fn post_mortem(&self) -> PostMortemSink {
        self.sink.clone()
    }

    pub fn stats(&self) -> Arc<Mutex<StatsStore>> {
        Arc::clone(&self.stats)
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    mut pipeline: Pipeline,
    tx: Sender<ExtractedWindow>,
    stop_flag: Arc<AtomicBool>,
    steps: Arc<AtomicU64>,
) {
    tracing::info!("Pipeline thread running");
    let pacing = pipeline.config().realtime.then(|| pipeline.config().chunk_duration());

    while !stop_flag.load(Ordering::Acquire) {
        let started = Instant::now();

        for window in pipeline.step() {
            match tx.try_send(window) {
                Ok(()) => {}
                Err(TrySendError::Full(window)) => {
                    tracing::warn!(
                        first_offset = window.first_offset,
                        "Window queue full, discarding window"
                    );
                    if let Ok(mut store) = pipeline.stats.lock() {
                        store.record_discarded();
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("No window consumer connected");
                }
            }
        }
        steps.fetch_add(1, Ordering::Relaxed);

        if let Some(period) = pacing {
            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }
}
