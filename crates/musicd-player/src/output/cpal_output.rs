//! Sound card output through CPAL.
//!
//! The CPAL stream lives on its own thread (streams are not `Send` on every
//! host). `play` converts chunks to `f32`, resamples them to the device rate
//! when needed and pushes them into a bounded [`SharedAudio`] queue; the
//! real-time callback drains that queue without blocking:
//! - refills a small local buffer from the shared queue
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use super::{AudioOutput, OutputConfig, OutputPlugin};
use crate::audio_format::AudioFormat;
use crate::device;
use crate::pcm::sample;
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::resample::{ResampleConfig, StreamResampler};

pub struct CpalOutputPlugin;

impl OutputPlugin for CpalOutputPlugin {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn create(&self, config: &OutputConfig) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput::new(config.clone())))
    }
}

pub struct CpalOutput {
    config: OutputConfig,
    session: Option<Session>,
}

/// Counters shared with the callback.
#[derive(Default)]
struct StreamCounters {
    played_frames: AtomicU64,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
}

struct Session {
    format: AudioFormat,
    queue: Arc<SharedAudio>,
    paused: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    counters: Arc<StreamCounters>,
    resampler: Option<StreamResampler>,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| anyhow!("cpal output is closed"))
    }
}

impl AudioOutput for CpalOutput {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| s.format == format) {
            return Ok(());
        }
        self.close();
        format.validate()?;
        self.session = Some(Session::start(&self.config, format)?);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn play(&mut self, pcm: &[u8]) -> Result<()> {
        let session = self.session()?;
        if session.failed.load(Ordering::Relaxed) {
            return Err(anyhow!("output stream failed"));
        }
        let samples = sample::to_f32(pcm, &session.format);
        let samples = match session.resampler.as_mut() {
            Some(r) => r.process(&samples)?,
            None => samples,
        };
        session.queue.push_interleaved_blocking(&samples);
        if session.failed.load(Ordering::Relaxed) {
            return Err(anyhow!("output stream failed"));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.session()?.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.session()?.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.queue.clear();
            if let Some(r) = s.resampler.as_mut() {
                r.reset();
            }
        }
    }

    fn drain(&mut self) {
        let budget = self.config.buffer_seconds.max(0.0) as f64 + 1.0;
        if let Some(s) = self.session.as_mut() {
            if let Some(r) = s.resampler.as_mut() {
                match r.flush() {
                    Ok(tail) => s.queue.push_interleaved_blocking(&tail),
                    Err(e) => tracing::debug!("resampler flush failed: {e:#}"),
                }
            }
            if !s.paused.load(Ordering::Relaxed)
                && !s.queue.wait_until_empty(Duration::from_secs_f64(budget))
            {
                tracing::warn!("output drain timed out");
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut s) = self.session.take() {
            s.stop();
        }
    }

    fn wants_silence(&self) -> bool {
        true
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl Session {
    fn start(config: &OutputConfig, format: AudioFormat) -> Result<Self> {
        let channels = format.channels as usize;
        let max_samples =
            calc_max_buffered_samples(format.sample_rate, channels, config.buffer_seconds);
        let queue = Arc::new(SharedAudio::new(channels, max_samples));
        let paused = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(StreamCounters::default());

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let stream_queue = queue.clone();
        let stream_paused = paused.clone();
        let stream_failed = failed.clone();
        let stream_counters = counters.clone();
        let needle = config.device.clone();
        let refill_max_frames = config.refill_max_frames.max(1);
        // The device buffer holds at most half of the queue.
        let buffer_frames = ((format.sample_rate as f32 * config.buffer_seconds.max(0.0)) / 2.0)
            .max(256.0) as u32;
        let thread = thread::Builder::new()
            .name("cpal-output".into())
            .spawn(move || {
                let opened = open_stream(
                    needle.as_deref(),
                    &format,
                    &stream_queue,
                    StreamOptions {
                        refill_max_frames,
                        buffer_frames,
                        paused: stream_paused,
                        failed: stream_failed,
                        counters: stream_counters,
                    },
                );
                match opened {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        // Keep the stream alive until close.
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("spawn output thread")?;

        let rate = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited during open"))??;

        let resampler = if rate != format.sample_rate {
            tracing::info!(from_hz = format.sample_rate, to_hz = rate, "resampling");
            Some(StreamResampler::new(
                format.sample_rate,
                rate,
                channels,
                ResampleConfig {
                    chunk_frames: config.chunk_frames.max(1),
                },
            )?)
        } else {
            tracing::info!(rate_hz = rate, "resample skipped");
            None
        };

        Ok(Self {
            format,
            queue,
            paused,
            failed,
            counters,
            resampler,
            shutdown,
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        self.queue.close();
        let _ = self.shutdown.send(());
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        tracing::info!(
            played_frames = self.counters.played_frames.load(Ordering::Relaxed),
            underrun_frames = self.counters.underrun_frames.load(Ordering::Relaxed),
            underrun_events = self.counters.underrun_events.load(Ordering::Relaxed),
            "output closed"
        );
    }
}

struct StreamOptions {
    refill_max_frames: usize,
    buffer_frames: u32,
    paused: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    counters: Arc<StreamCounters>,
}

/// Pick device and config, build the stream and start it. Returns the
/// stream and the device sample rate.
fn open_stream(
    needle: Option<&str>,
    format: &AudioFormat,
    queue: &Arc<SharedAudio>,
    opts: StreamOptions,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let supported = device::pick_output_config(&device, format)?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(size) = device::pick_buffer_size(&supported, opts.buffer_frames) {
        stream_config.buffer_size = size;
    }
    if let Ok(desc) = device.description() {
        tracing::info!(
            device = %desc.name(),
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?supported.sample_format(),
            "output device opened"
        );
    }

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, queue, opts),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, queue, opts),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, queue, opts),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, queue, opts),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play()?;
    Ok((stream, stream_config.sample_rate))
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    opts: StreamOptions,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let mut st = CallbackState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    };
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let queue_cb = queue.clone();
    let queue_err = queue.clone();
    let StreamOptions {
        refill_max_frames,
        paused,
        failed,
        counters,
        ..
    } = opts;

    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        failed.store(true, Ordering::Relaxed);
        queue_err.close();
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let frames = data.len() / channels_out;
            let mut filled_frames = 0usize;

            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match queue_cb.pop(refill_max_frames) {
                        Some(v) => st.src = v,
                        None => {
                            counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                            counters
                                .underrun_frames
                                .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let v = next_sample_mapped(&mut st, channels_out, ch);
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(v);
                }
                filled_frames += 1;
            }

            if filled_frames > 0 {
                counters
                    .played_frames
                    .fetch_add(filled_frames as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Samples fetched from the queue but not yet written to the device.
struct CallbackState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available source channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut CallbackState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &CallbackState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        (1, _) => get_src(0, st),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}
