// src/gpu/wgpu_backend.rs
// Real GPU backend on wgpu. Owns device, queue and surface; every viewer handle maps to one
// entry in `resources`. Bind group layouts, the sampler and the 1x1 fallback texture are
// backend internals and live as long as the backend.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{
    BindingDesc, BindingLayout, BufferDesc, BufferUsage, FrameDraw, GpuBackend, GpuHandle,
    HandleAllocator, MeshVertex, ProgramDesc, ProgramKind, ResourceKind, TextureDesc,
};
use crate::context::OptionContext;
use crate::error::{Result, ViewerError};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

enum Resource {
    Buffer(wgpu::Buffer),
    Texture { texture: wgpu::Texture, view: wgpu::TextureView },
    Binding(wgpu::BindGroup),
    Program(wgpu::RenderPipeline),
}

struct Layouts {
    frame: wgpu::BindGroupLayout,
    mesh: wgpu::BindGroupLayout,
    overlay: wgpu::BindGroupLayout,
}

pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    layouts: Layouts,
    sampler: wgpu::Sampler,
    fallback_view: wgpu::TextureView,
    ids: HandleAllocator,
    resources: HashMap<GpuHandle, Resource>,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|e| ViewerError::exhausted(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no compatible GPU adapter")?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Showroom Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| ViewerError::exhausted(format!("device: {e}")))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no formats")?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!("wgpu surface {}x{} {:?}", config.width, config.height, format);

        let depth_view = create_depth_view(&device, config.width, config.height);
        let layouts = create_layouts(&device);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Base Color Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let fallback = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("Fallback White"),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let fallback_view = fallback.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_view,
            layouts,
            sampler,
            fallback_view,
            ids: HandleAllocator::default(),
            resources: HashMap::new(),
        })
    }

    /// Run `f` inside out-of-memory and validation error scopes. Validation failures here come
    /// from asset data exceeding device limits.
    fn guarded<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device, &wgpu::Queue) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device, &self.queue);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = oom {
            return Err(ViewerError::exhausted(format!("{what}: {err}")));
        }
        match validation {
            Some(err) => Err(ViewerError::unsupported(what, err)),
            None => Ok(value),
        }
    }

    fn insert(&mut self, kind: ResourceKind, resource: Resource) -> GpuHandle {
        let handle = self.ids.next(kind);
        self.resources.insert(handle, resource);
        handle
    }

    fn buffer(&self, handle: GpuHandle) -> Result<&wgpu::Buffer> {
        match self.resources.get(&handle) {
            Some(Resource::Buffer(b)) => Ok(b),
            _ => Err(ViewerError::invalid_state(format!("buffer #{} is not live", handle.id()))),
        }
    }

    fn texture_view(&self, handle: GpuHandle) -> Result<&wgpu::TextureView> {
        match self.resources.get(&handle) {
            Some(Resource::Texture { view, .. }) => Ok(view),
            _ => Err(ViewerError::invalid_state(format!("texture #{} is not live", handle.id()))),
        }
    }

    fn uniform_entry(&self, binding: u32, handle: Option<&GpuHandle>) -> Result<wgpu::BindGroupEntry<'_>> {
        let handle = handle.copied().context("binding is missing a uniform buffer")?;
        Ok(wgpu::BindGroupEntry { binding, resource: self.buffer(handle)?.as_entire_binding() })
    }

    fn pipeline(&self, desc: &ProgramDesc<'_>) -> wgpu::RenderPipeline {
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let groups: Vec<&wgpu::BindGroupLayout> = match desc.kind {
            ProgramKind::Mesh => vec![&self.layouts.frame, &self.layouts.mesh],
            ProgramKind::Overlay => vec![&self.layouts.overlay],
        };
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &groups,
            push_constant_ranges: &[],
        });

        const ATTRS: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];
        let mesh_buffers = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRS,
        }];
        let (buffers, depth_write, depth_compare): (&[wgpu::VertexBufferLayout], _, _) = match desc.kind {
            ProgramKind::Mesh => (&mesh_buffers, true, wgpu::CompareFunction::Less),
            ProgramKind::Overlay => (&[], false, wgpu::CompareFunction::Always),
        };

        let blend = match desc.kind {
            ProgramKind::Mesh => wgpu::BlendState::REPLACE,
            ProgramKind::Overlay => wgpu::BlendState::ALPHA_BLENDING,
        };

        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: depth_write,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<GpuHandle> {
        let usage = match desc.usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        };
        let limit = self.device.limits().max_buffer_size;
        crate::ensure!(
            desc.contents.len() as u64 <= limit,
            ViewerError::unsupported(
                desc.label,
                format!("buffer of {} bytes exceeds the device limit {limit}", desc.contents.len())
            )
        );
        let buffer = self.guarded(desc.label, |device, _| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: desc.contents,
                usage,
            })
        })?;
        Ok(self.insert(ResourceKind::Buffer, Resource::Buffer(buffer)))
    }

    fn write_buffer(&mut self, buffer: GpuHandle, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.buffer(buffer)?;
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<GpuHandle> {
        crate::ensure!(
            desc.rgba.len() == (desc.width as usize) * (desc.height as usize) * 4,
            ViewerError::unsupported(desc.label, "short pixel buffer")
        );
        let size = wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 };
        let limit = self.device.limits().max_texture_dimension_2d;
        crate::ensure!(
            desc.width <= limit && desc.height <= limit,
            ViewerError::unsupported(
                desc.label,
                format!("texture {}x{} exceeds the device limit {limit}", desc.width, desc.height)
            )
        );
        let texture = self.guarded(desc.label, |device, queue| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                desc.rgba,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * desc.width),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
            texture
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.insert(ResourceKind::Texture, Resource::Texture { texture, view }))
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<GpuHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.pipeline(desc);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ViewerError::invalid_state(format!("program `{}`: {err}", desc.label)));
        }
        Ok(self.insert(ResourceKind::Program, Resource::Program(pipeline)))
    }

    fn create_binding(&mut self, desc: &BindingDesc<'_>) -> Result<GpuHandle> {
        let (layout, entries) = match desc.layout {
            BindingLayout::Frame => (
                &self.layouts.frame,
                vec![
                    self.uniform_entry(0, desc.buffers.first())?,
                    self.uniform_entry(1, desc.buffers.get(1))?,
                ],
            ),
            BindingLayout::Mesh => {
                let view = match desc.texture {
                    Some(t) => self.texture_view(t)?,
                    None => &self.fallback_view,
                };
                (
                    &self.layouts.mesh,
                    vec![
                        self.uniform_entry(0, desc.buffers.first())?,
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(view) },
                        wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                    ],
                )
            }
            BindingLayout::Overlay => {
                (&self.layouts.overlay, vec![self.uniform_entry(0, desc.buffers.first())?])
            }
        };
        let group = self.guarded(desc.label, |device, _| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(desc.label),
                layout,
                entries: &entries,
            })
        })?;
        Ok(self.insert(ResourceKind::Binding, Resource::Binding(group)))
    }

    fn release(&mut self, handle: GpuHandle) -> Result<()> {
        match self.resources.remove(&handle) {
            Some(Resource::Buffer(buffer)) => {
                buffer.destroy();
                Ok(())
            }
            Some(Resource::Texture { texture, .. }) => {
                texture.destroy();
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ViewerError::invalid_state(format!(
                "double release of {:?} #{}",
                handle.kind(),
                handle.id()
            ))),
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let limit = self.device.limits().max_texture_dimension_2d;
        let (width, height) = (width.clamp(1, limit), height.clamp(1, limit));
        if (self.config.width, self.config.height) == (width, height) {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, width, height);
        log::debug!("surface resized to {width}x{height}");
    }

    fn draw(&mut self, frame: &FrameDraw) -> Result<()> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(ViewerError::exhausted("surface texture"));
            }
            Err(err) => {
                log::warn!("skipping frame: {err}");
                return Ok(());
            }
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let [r, g, b, a] = frame.clear_color.map(f64::from);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Showroom Frame") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Showroom Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for item in &frame.items {
                let Some(Resource::Program(pipeline)) = self.resources.get(&item.program) else {
                    log::warn!("draw item references missing program #{}", item.program.id());
                    continue;
                };
                pass.set_pipeline(pipeline);
                for (group, handle) in item.bindings.iter().enumerate() {
                    if let Some(Resource::Binding(bind_group)) = self.resources.get(handle) {
                        pass.set_bind_group(group as u32, bind_group, &[]);
                    }
                }
                if let Some(vb) = item.vertex_buffer {
                    pass.set_vertex_buffer(0, self.buffer(vb)?.slice(..));
                }
                match item.index_buffer {
                    Some(ib) => {
                        pass.set_index_buffer(self.buffer(ib)?.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..item.count, 0, 0..1);
                    }
                    None => pass.draw(0..item.count, 0..1),
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn live_resources(&self) -> usize {
        self.resources.len()
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn uniform_layout_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_layouts(device: &wgpu::Device) -> Layouts {
    let both = wgpu::ShaderStages::VERTEX_FRAGMENT;
    let frame = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Frame Layout"),
        entries: &[
            uniform_layout_entry(0, both),
            uniform_layout_entry(1, wgpu::ShaderStages::FRAGMENT),
        ],
    });
    let mesh = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Mesh Layout"),
        entries: &[
            uniform_layout_entry(0, both),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });
    let overlay = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Overlay Layout"),
        entries: &[uniform_layout_entry(0, both)],
    });
    Layouts { frame, mesh, overlay }
}
