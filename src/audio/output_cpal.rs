//! CPAL-based audio sink
//!
//! Cross-platform output using the `cpal` crate. Frames pushed by the engine
//! are queued and drained by the device callback; the queue length is the
//! reported delay.

#[cfg(feature = "audio-cpal")]
mod implementation {
    use super::super::format::OutputFormat;
    use super::super::output::{AudioSink, SinkCapabilities, SinkError};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Queue that has not drained for this long is reported as stalled.
    const STALL_TIMEOUT: Duration = Duration::from_secs(2);

    enum StreamCommand {
        Stop,
    }

    #[derive(Default)]
    struct SharedQueue {
        samples: VecDeque<i16>,
        last_drain: Option<Instant>,
    }

    /// CPAL-based sink
    pub struct CpalSink {
        host: cpal::Host,
        channels: usize,
        queue: Arc<Mutex<SharedQueue>>,
        command_tx: Option<mpsc::Sender<StreamCommand>>,
    }

    impl CpalSink {
        /// Create a sink on the default host
        ///
        /// # Errors
        ///
        /// Returns `SinkError` if the audio host cannot be initialized.
        pub fn new() -> Result<Self, SinkError> {
            Ok(Self {
                host: cpal::default_host(),
                channels: 2,
                queue: Arc::new(Mutex::new(SharedQueue::default())),
                command_tx: None,
            })
        }

        fn spawn_stream_thread(
            device: cpal::Device,
            config: cpal::StreamConfig,
            queue: Arc<Mutex<SharedQueue>>,
            rx: mpsc::Receiver<StreamCommand>,
            status_tx: mpsc::Sender<Result<(), SinkError>>,
        ) {
            thread::spawn(move || {
                let err_fn = |err| tracing::error!("CPAL stream error: {}", err);
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut q = queue.lock().unwrap_or_else(PoisonError::into_inner);
                        let available = q.samples.len().min(data.len());
                        for (dst, src) in data.iter_mut().zip(q.samples.drain(..available)) {
                            *dst = src;
                        }
                        data[available..].fill(0);
                        if available > 0 {
                            q.last_drain = Some(Instant::now());
                        }
                    },
                    err_fn,
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = status_tx.send(Err(SinkError::Device(e.to_string())));
                            return;
                        }
                        if status_tx.send(Ok(())).is_err() {
                            return;
                        }
                        // Hold the stream until told to stop or the sink is dropped.
                        let _ = rx.recv();
                    }
                    Err(e) => {
                        let _ = status_tx.send(Err(SinkError::Device(e.to_string())));
                    }
                }
            });
        }

        fn lock_queue(&self) -> std::sync::MutexGuard<'_, SharedQueue> {
            self.queue.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl AudioSink for CpalSink {
        fn capabilities(&self) -> SinkCapabilities {
            SinkCapabilities::with_delay()
        }

        fn start(&mut self, rate: u32, format: OutputFormat) -> Result<(), SinkError> {
            let native = if cfg!(target_endian = "little") {
                OutputFormat::S16Le
            } else {
                OutputFormat::S16Be
            };
            if format != OutputFormat::S16 && format != native {
                return Err(SinkError::Format(format));
            }
            if self.command_tx.is_some() {
                self.stop();
            }

            let device = self
                .host
                .default_output_device()
                .ok_or_else(|| SinkError::Device("No default output device".into()))?;
            let config = cpal::StreamConfig {
                channels: 2,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (tx, rx) = mpsc::channel();
            let (status_tx, status_rx) = mpsc::channel();
            Self::spawn_stream_thread(device, config, self.queue.clone(), rx, status_tx);
            status_rx
                .recv()
                .map_err(|_| SinkError::Device("Audio thread panicked".into()))??;
            self.command_tx = Some(tx);
            tracing::info!(rate, "CPAL sink started");
            Ok(())
        }

        fn play(&mut self, buf: &[u8], frames: usize) -> Result<(), SinkError> {
            if self.command_tx.is_none() {
                return Err(SinkError::Closed);
            }
            let samples = frames * self.channels;
            let mut q = self.lock_queue();
            q.samples.extend(
                buf.chunks_exact(2)
                    .take(samples)
                    .map(|b| i16::from_ne_bytes([b[0], b[1]])),
            );
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(tx) = self.command_tx.take() {
                let _ = tx.send(StreamCommand::Stop);
            }
            self.lock_queue().samples.clear();
        }

        fn flush(&mut self) {
            let mut q = self.lock_queue();
            q.samples.clear();
            q.last_drain = None;
        }

        #[allow(clippy::cast_possible_wrap, reason = "Queue lengths are far below i64::MAX")]
        fn delay(&mut self) -> Result<i64, SinkError> {
            let q = self.lock_queue();
            let queued = q.samples.len() / self.channels;
            if queued > 0 && q.last_drain.is_some_and(|t| t.elapsed() > STALL_TIMEOUT) {
                return Err(SinkError::Stalled);
            }
            Ok(queued as i64)
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(feature = "audio-cpal")]
pub use implementation::CpalSink;
