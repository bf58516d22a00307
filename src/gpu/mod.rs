//! `wgpu` implementation of the device the measurement loop drives.
//!
//! Work is recorded into pending command buffers and only reaches the queue
//! on [`Gpu::flush`]. Every render target carries an in-flight flag that is
//! raised when work against it is recorded and cleared from
//! `Queue::on_submitted_work_done` once the submission containing it retires.

mod image;
mod timer;
pub mod transfer;

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use wgpu::*;

use crate::error::BenchError;
use crate::measure::Gpu;

pub use image::{test_pattern, SourceImage};
pub use timer::GpuTimer;

/// Format of the source image and of every render target.
pub const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const BYTES_PER_PIXEL: u32 = 8;

/// Runs right after the pending work has been handed to the queue.
pub type SubmitHook = Box<dyn FnOnce(&Queue)>;

#[derive(Default)]
struct Pending {
    commands: Vec<CommandBuffer>,
    touched: Vec<Arc<AtomicBool>>,
    hooks: Vec<SubmitHook>,
}

pub struct GpuContext {
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    timestamps: bool,
    compute: bool,
    storable: bool,
    linear: Sampler,
    nearest: Sampler,
    pending: RefCell<Pending>,
    errors: ErrorSink,
}

#[derive(Default)]
struct SinkState {
    error: Option<String>,
    lost: Option<String>,
}

/// Collects errors the device reports from its callbacks.
///
/// Validation errors are taken by the next check. A lost device stays lost, so
/// every later check fails with the same message.
#[derive(Clone, Default)]
struct ErrorSink(Arc<Mutex<SinkState>>);

impl ErrorSink {
    fn report(&self, message: String) {
        if let Ok(mut state) = self.0.lock() {
            state.error.get_or_insert(message);
        }
    }

    fn lose(&self, message: String) {
        if let Ok(mut state) = self.0.lock() {
            state.lost.get_or_insert(message);
        }
    }

    fn check(&self) -> Result<(), BenchError> {
        let Ok(mut state) = self.0.lock() else {
            return Err(BenchError::Device("device error sink poisoned".to_owned()));
        };
        if let Some(lost) = &state.lost {
            return Err(BenchError::Device(format!("device lost: {lost}")));
        }
        match state.error.take() {
            Some(message) => Err(BenchError::Device(message)),
            None => Ok(()),
        }
    }
}

impl GpuContext {
    pub async fn new() -> Result<Self, BenchError> {
        let instance = Instance::default();
        let adapter = Self::request_adapter(&instance)
            .await
            .ok_or(BenchError::NoAdapter)?;
        let adapter_info = adapter.get_info();
        info!(
            "Using adapter '{}' ({:?}, {:?})",
            adapter_info.name, adapter_info.backend, adapter_info.device_type
        );

        let timestamps = adapter.features().contains(Features::TIMESTAMP_QUERY);
        let mut required_features = Features::empty();
        if timestamps {
            required_features |= Features::TIMESTAMP_QUERY;
        } else {
            warn!("Adapter has no timestamp queries, GPU times will not be reported");
        }
        let compute = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(DownlevelFlags::COMPUTE_SHADERS);
        if !compute {
            warn!("Adapter has no compute shaders, compute-only benchmarks will be skipped");
        }

        let format = adapter.get_texture_format_features(TARGET_FORMAT);
        if !format.flags.contains(TextureFormatFeatureFlags::FILTERABLE) {
            return Err(BenchError::MissingFormat(TARGET_FORMAT, "not filterable"));
        }
        let required_usages = TextureUsages::TEXTURE_BINDING
            | TextureUsages::RENDER_ATTACHMENT
            | TextureUsages::COPY_SRC
            | TextureUsages::COPY_DST;
        if !format.allowed_usages.contains(required_usages) {
            return Err(BenchError::MissingFormat(
                TARGET_FORMAT,
                "not renderable or copyable",
            ));
        }
        let storable = format
            .allowed_usages
            .contains(TextureUsages::STORAGE_BINDING);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Benchmark Device"),
                    required_features,
                    required_limits: adapter.limits(),
                    memory_hints: MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let errors = ErrorSink::default();
        let sink = errors.clone();
        device.on_uncaptured_error(Box::new(move |err: Error| {
            error!("Uncaptured device error: {err}");
            sink.report(err.to_string());
        }));
        let sink = errors.clone();
        device.set_device_lost_callback(move |reason: DeviceLostReason, message: String| {
            error!("Device lost ({reason:?}): {message}");
            sink.lose(message);
        });

        let linear = device.create_sampler(&SamplerDescriptor {
            label: Some("Linear Sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });
        let nearest = device.create_sampler(&SamplerDescriptor {
            label: Some("Nearest Sampler"),
            ..Default::default()
        });

        Ok(Self {
            adapter,
            device,
            queue,
            timestamps,
            compute,
            storable,
            linear,
            nearest,
            pending: RefCell::new(Pending::default()),
            errors,
        })
    }

    async fn request_adapter(instance: &Instance) -> Option<Adapter> {
        let mut options = RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        };
        if let Some(adapter) = instance.request_adapter(&options).await {
            return Some(adapter);
        }
        warn!("No hardware adapter found, trying a software fallback");
        options.force_fallback_adapter = true;
        instance.request_adapter(&options).await
    }

    pub fn supports_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn supports_compute(&self) -> bool {
        self.compute
    }

    pub fn sampler(&self, filter: FilterMode) -> &Sampler {
        match filter {
            FilterMode::Linear => &self.linear,
            FilterMode::Nearest => &self.nearest,
        }
    }

    /// Queues recorded commands that write `target`.
    pub fn enqueue(&self, commands: CommandBuffer, target: &Target) {
        let mut pending = self.pending.borrow_mut();
        pending.commands.push(commands);
        drop(pending);
        self.touch(target);
    }

    /// Marks `target` as written by work that reaches the queue on the next
    /// flush, e.g. a `Queue::write_texture`.
    pub fn touch(&self, target: &Target) {
        target.busy.store(true, Ordering::Release);
        self.pending
            .borrow_mut()
            .touched
            .push(Arc::clone(&target.busy));
    }

    pub fn after_submit(&self, hook: SubmitHook) {
        self.pending.borrow_mut().hooks.push(hook);
    }

    pub fn check_errors(&self) -> Result<(), BenchError> {
        self.errors.check()
    }

    /// Runs `create` inside a validation error scope, turning shader and
    /// pipeline validation failures into record errors.
    pub fn validated<T>(&self, create: impl FnOnce(&Device) -> T) -> Result<T, BenchError> {
        self.device.push_error_scope(ErrorFilter::Validation);
        let created = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(BenchError::Record(err.to_string())),
            None => Ok(created),
        }
    }

    /// Records a clear of the whole target.
    pub fn clear(&self, target: &Target) {
        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Clear Target"),
        });
        encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Clear Target"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::TRANSPARENT),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.enqueue(encoder.finish(), target);
    }
}

impl Gpu for GpuContext {
    type Target = Target;
    type Timer = GpuTimer;

    /// Never blocks: the ring only polls with `NO_WAIT` and spins itself.
    fn poll(&self, target: &Target, _timeout: u64) -> Result<bool, BenchError> {
        let _ = self.device.poll(Maintain::Poll);
        self.check_errors()?;
        Ok(target.busy.load(Ordering::Acquire))
    }

    fn flush(&self) {
        let Pending {
            commands,
            touched,
            hooks,
        } = std::mem::take(&mut *self.pending.borrow_mut());
        self.queue.submit(commands);
        for hook in hooks {
            hook(&self.queue);
        }
        if !touched.is_empty() {
            self.queue.on_submitted_work_done(move || {
                for flag in touched {
                    flag.store(false, Ordering::Release);
                }
            });
        }
    }

    fn finish(&self) -> Result<(), BenchError> {
        self.flush();
        let _ = self.device.poll(Maintain::Wait);
        self.check_errors()
    }

    fn create_timer(&self) -> Option<GpuTimer> {
        self.timestamps
            .then(|| GpuTimer::new(&self.device, &self.queue))
    }

    fn query_timer(&self, timer: &mut GpuTimer) -> u64 {
        let _ = self.device.poll(Maintain::Poll);
        timer.next_result()
    }
}

/// One render target of the frame ring.
pub struct Target {
    texture: Texture,
    view: TextureView,
    storable: bool,
    busy: Arc<AtomicBool>,
}

impl Target {
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let mut usage = TextureUsages::RENDER_ATTACHMENT
            | TextureUsages::TEXTURE_BINDING
            | TextureUsages::COPY_SRC
            | TextureUsages::COPY_DST;
        if ctx.storable {
            usage |= TextureUsages::STORAGE_BINDING;
        }
        let texture = ctx.device.create_texture(&TextureDescriptor {
            label: Some("Render Target"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TARGET_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        Self {
            texture,
            view,
            storable: ctx.storable,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn size(&self) -> Extent3d {
        self.texture.size()
    }

    pub fn storable(&self) -> bool {
        self.storable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_validation_error_wins_and_is_taken() {
        let sink = ErrorSink::default();
        assert!(sink.check().is_ok());
        sink.report("first".to_owned());
        sink.report("second".to_owned());
        match sink.check() {
            Err(BenchError::Device(message)) => assert_eq!(message, "first"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(sink.check().is_ok());
    }

    #[test]
    fn lost_device_fails_every_later_check() {
        let sink = ErrorSink::default();
        let callback = sink.clone();
        callback.lose("driver reset".to_owned());
        callback.report("late validation error".to_owned());
        for _ in 0..3 {
            match sink.check() {
                Err(BenchError::Device(message)) => {
                    assert_eq!(message, "device lost: driver reset")
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
