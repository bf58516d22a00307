use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::{debug, trace};
use wgpu::*;

use super::{ComputeMode, Resource, ShaderBuilder, ShaderCode};
use crate::error::BenchError;
use crate::gpu::{GpuContext, GpuTimer, Target, TARGET_FORMAT};

const WORKGROUP_SIZE: u32 = 8;

enum PipelineKind {
    Render(RenderPipeline),
    Compute(ComputePipeline),
}

/// Owned identity of one bound resource.
#[derive(Clone, PartialEq, Eq, Hash)]
enum BoundResource {
    Texture(TextureView),
    Sampler(FilterMode),
    Storage(Buffer),
}

struct CachedPipeline {
    layout: BindGroupLayout,
    kind: PipelineKind,
    /// Parameter buffer, sized by the source and rewritten on every use.
    uniform: Option<(u32, Buffer)>,
    /// Keyed by the bound resources and, for compute, the output view.
    bind_groups: HashMap<(Vec<BoundResource>, Option<TextureView>), BindGroup>,
}

/// Compiles finished shaders and records them against render targets.
///
/// Pipelines are cached by generated source, so repeated iterations of the
/// same effect compile once. The parameter buffer and bind groups live with
/// the pipeline; a frame only uploads the current parameter values.
#[derive(Default)]
pub struct Dispatch {
    cache: HashMap<String, CachedPipeline>,
}

impl Dispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin<'a>(&self, ctx: &'a GpuContext) -> ShaderBuilder<'a> {
        ShaderBuilder::new(ctx)
    }

    /// Records `sh` rendering into `target`. With a timer, the pass is
    /// wrapped in a timestamp query pair.
    pub fn finish(
        &mut self,
        sh: ShaderBuilder<'_>,
        target: &Target,
        mut timer: Option<&mut GpuTimer>,
    ) -> Result<(), BenchError> {
        let (ctx, code, resources, mode) = sh.into_parts();
        let compute = match mode {
            ComputeMode::Never => false,
            ComputeMode::Preferred => ctx.supports_compute() && target.storable(),
            ComputeMode::Required if target.storable() => true,
            ComputeMode::Required => {
                return Err(BenchError::Record(
                    "compute shader needs a storable render target".into(),
                ))
            }
        };
        let size = target.size();
        let source = code.source(size.width, size.height, compute);

        let cached = self.cache.len();
        let pipeline = match self.cache.entry(source) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let pipeline = compile(ctx, entry.key(), &resources, &code, compute)?;
                debug!(
                    "Compiled {} pipeline ({} cached)",
                    if compute { "compute" } else { "render" },
                    cached + 1
                );
                entry.insert(pipeline)
            }
        };

        let CachedPipeline {
            layout,
            kind,
            uniform,
            bind_groups,
        } = pipeline;
        if let Some((_, buffer)) = uniform {
            ctx.queue.write_buffer(buffer, 0, code.uniform_bytes());
        }

        let bound = resources
            .iter()
            .map(|resource| match resource {
                Resource::Texture(view) => BoundResource::Texture((*view).clone()),
                Resource::Sampler(filter) => BoundResource::Sampler(*filter),
                Resource::Storage(buffer) => BoundResource::Storage((*buffer).clone()),
            })
            .collect();
        let output = compute.then(|| target.view().clone());
        let bind_group = match bind_groups.entry((bound, output)) {
            Entry::Occupied(entry) => &*entry.into_mut(),
            Entry::Vacant(entry) => {
                let (bound, output) = entry.key();
                let output = output.as_ref().map(|view| (code.output_binding(), view));
                let group = create_bind_group(ctx, layout, bound, uniform.as_ref(), output);
                trace!("Created bind group for {} bindings", bound.len());
                &*entry.insert(group)
            }
        };

        let slot = timer.as_deref_mut().and_then(GpuTimer::begin);
        let timer = timer.as_deref();
        let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Shader Encoder"),
        });
        match &*kind {
            PipelineKind::Render(render) => {
                let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                    label: Some("Shader Pass"),
                    color_attachments: &[Some(RenderPassColorAttachment {
                        view: target.view(),
                        resolve_target: None,
                        ops: Operations {
                            load: LoadOp::Clear(Color::TRANSPARENT),
                            store: StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: timer.zip(slot).map(|(t, s)| t.render_writes(s)),
                    occlusion_query_set: None,
                });
                pass.set_pipeline(render);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            PipelineKind::Compute(compute) => {
                let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                    label: Some("Shader Pass"),
                    timestamp_writes: timer.zip(slot).map(|(t, s)| t.compute_writes(s)),
                });
                pass.set_pipeline(compute);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(
                    size.width.div_ceil(WORKGROUP_SIZE),
                    size.height.div_ceil(WORKGROUP_SIZE),
                    1,
                );
            }
        }
        if let (Some(timer), Some(slot)) = (timer, slot) {
            timer.resolve(&mut encoder, slot);
            ctx.after_submit(timer.map_after_submit(slot));
        }
        ctx.enqueue(encoder.finish(), target);
        Ok(())
    }
}

fn create_bind_group(
    ctx: &GpuContext,
    layout: &BindGroupLayout,
    bound: &[BoundResource],
    uniform: Option<&(u32, Buffer)>,
    output: Option<(u32, &TextureView)>,
) -> BindGroup {
    let mut entries: Vec<BindGroupEntry> = bound
        .iter()
        .enumerate()
        .map(|(binding, resource)| BindGroupEntry {
            binding: binding as u32,
            resource: match resource {
                BoundResource::Texture(view) => BindingResource::TextureView(view),
                BoundResource::Sampler(filter) => BindingResource::Sampler(ctx.sampler(*filter)),
                BoundResource::Storage(buffer) => buffer.as_entire_binding(),
            },
        })
        .collect();
    if let Some((binding, buffer)) = uniform {
        entries.push(BindGroupEntry {
            binding: *binding,
            resource: buffer.as_entire_binding(),
        });
    }
    if let Some((binding, view)) = output {
        entries.push(BindGroupEntry {
            binding,
            resource: BindingResource::TextureView(view),
        });
    }
    ctx.device.create_bind_group(&BindGroupDescriptor {
        label: Some("Shader Bindings"),
        layout,
        entries: &entries,
    })
}

fn compile(
    ctx: &GpuContext,
    source: &str,
    resources: &[Resource<'_>],
    code: &ShaderCode,
    compute: bool,
) -> Result<CachedPipeline, BenchError> {
    let visibility = if compute {
        ShaderStages::COMPUTE
    } else {
        ShaderStages::FRAGMENT
    };
    let mut entries: Vec<BindGroupLayoutEntry> = resources
        .iter()
        .enumerate()
        .map(|(binding, resource)| BindGroupLayoutEntry {
            binding: binding as u32,
            visibility,
            ty: match resource {
                Resource::Texture(_) => BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                Resource::Sampler(_) => BindingType::Sampler(SamplerBindingType::Filtering),
                Resource::Storage(_) => BindingType::Buffer {
                    ty: BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            },
            count: None,
        })
        .collect();
    let mut next = entries.len() as u32;
    let uniform = code.uniform_binding();
    if let Some(binding) = uniform {
        entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        next = binding + 1;
    }
    if compute {
        entries.push(BindGroupLayoutEntry {
            binding: next,
            visibility,
            ty: BindingType::StorageTexture {
                access: StorageTextureAccess::WriteOnly,
                format: TARGET_FORMAT,
                view_dimension: TextureViewDimension::D2,
            },
            count: None,
        });
    }

    ctx.validated(|device| {
        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Effect Shader"),
            source: ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        let layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Effect Layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let kind = if compute {
            PipelineKind::Compute(device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some("Effect Compute Pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("cs_main"),
                compilation_options: Default::default(),
                cache: None,
            }))
        } else {
            PipelineKind::Render(device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("Effect Render Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                primitive: PrimitiveState::default(),
                depth_stencil: None,
                multisample: MultisampleState::default(),
                multiview: None,
                cache: None,
            }))
        };
        let uniform = uniform.map(|binding| {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some("Shader Params"),
                size: code.uniform_bytes().len() as BufferAddress,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (binding, buffer)
        });
        CachedPipeline {
            layout,
            kind,
            uniform,
            bind_groups: HashMap::new(),
        }
    })
}
