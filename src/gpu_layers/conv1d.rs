use std::fmt;

use ndarray::{concatenate, Array3, ArrayView3, Axis};
use tracing::debug;
use wgpu::{self, BindGroup, Buffer, ComputePipeline, Device, PipelineCompilationOptions, Queue};

use crate::error::{Error, Result};
use crate::executor::{self, ConvExecutor};
use crate::layers::Conv1DLayer;

const WORKGROUP_SIZE: u32 = 8;
const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Inference-mode Conv1D forward pass on a wgpu compute pipeline.
pub struct Conv1DGpu {
    device: Device,
    queue: Queue,
    pipeline: ComputePipeline,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvParams {
    pub batch_size: u32,
    pub in_channels: u32,
    pub out_channels: u32,
    pub steps: u32,
    pub kernel_size: u32,
    pub pad_before: u32,
    pub use_bias: u32,
    pub _padding: u32,
}

impl ConvParams {
    fn output_len(&self) -> usize {
        (self.batch_size * self.steps * self.out_channels) as usize
    }
}

/// Device buffers for one dispatch.
pub struct ConvBuffers {
    bind_group: BindGroup,
    output_buffer: Buffer,
    params: ConvParams,
}

impl fmt::Debug for Conv1DGpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conv1DGpu").finish_non_exhaustive()
    }
}

impl Conv1DGpu {
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::MissingCapability("no compatible GPU adapter was found".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Conv1D Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::MissingCapability(format!("failed to acquire GPU device: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Conv1D Shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!("conv1d_shader.wgsl"))),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Conv1D Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("conv1d_main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });

        debug!(adapter = ?adapter.get_info().name, "initialized GPU convolution pipeline");

        Ok(Conv1DGpu { device, queue, pipeline })
    }

    fn storage_buffer(&self, label: &str, data: &[f32]) -> Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (data.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(data));
        buffer
    }

    pub fn prepare_buffers(
        &self,
        input: &[f32],
        weights: &[f32],
        bias: &[f32],
        params: ConvParams,
    ) -> ConvBuffers {
        let input_buffer = self.storage_buffer("Input Buffer", input);
        let weight_buffer = self.storage_buffer("Weight Buffer", weights);
        // Bindings may not be empty, so a layer without bias still gets one zero.
        let bias_buffer = if bias.is_empty() {
            self.storage_buffer("Bias Buffer", &[0.0])
        } else {
            self.storage_buffer("Bias Buffer", bias)
        };

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: (params.output_len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Params Buffer"),
            size: std::mem::size_of::<ConvParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Conv1D Bind Group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: weight_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bias_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        ConvBuffers {
            bind_group,
            output_buffer,
            params,
        }
    }

    pub async fn compute(&self, buffers: &ConvBuffers) -> Result<Vec<f32>> {
        let params = buffers.params;
        let output_size = (params.output_len() * std::mem::size_of::<f32>()) as u64;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Conv1D Encoder"),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Conv1D Pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &buffers.bind_group, &[]);
            compute_pass.dispatch_workgroups(
                params.out_channels.div_ceil(WORKGROUP_SIZE),
                params.steps.div_ceil(WORKGROUP_SIZE),
                params.batch_size,
            );
        }

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Staging Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&buffers.output_buffer, 0, &staging_buffer, 0, output_size);

        self.queue.submit(Some(encoder.finish()));

        let output_slice = staging_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        output_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match rx.receive().await {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(Error::Gpu(format!("failed to map output buffer: {e}"))),
            None => return Err(Error::Gpu("output buffer mapping was cancelled".to_string())),
        }

        let data = output_slice.get_mapped_range();
        let result = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }
}

/// Largest number of instances a single dispatch can hold under `limits`.
///
/// Fails when even one instance, or the weights alone, cannot fit.
pub fn max_dispatch_batch(limits: &wgpu::Limits, layer: &Conv1DLayer, steps: usize) -> Result<usize> {
    let max_groups = limits.max_compute_workgroups_per_dimension as usize;
    let groups = WORKGROUP_SIZE as usize;
    if layer.filters.div_ceil(groups) > max_groups || steps.div_ceil(groups) > max_groups {
        return Err(Error::Gpu(format!(
            "{} steps with {} filters exceed the limit of {} workgroups per dispatch dimension",
            steps, layer.filters, max_groups
        )));
    }

    let max_binding = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    let weight_bytes = (layer.kernel_size * layer.in_channels * layer.filters) as u64 * F32_BYTES;
    if weight_bytes > max_binding {
        return Err(Error::Gpu(format!(
            "weights of {} bytes exceed the storage binding limit of {} bytes",
            weight_bytes, max_binding
        )));
    }

    let instance_bytes = (steps * layer.in_channels.max(layer.filters)) as u64 * F32_BYTES;
    if instance_bytes > max_binding {
        return Err(Error::Gpu(format!(
            "one instance needs {} bytes, over the storage binding limit of {} bytes",
            instance_bytes, max_binding
        )));
    }

    let by_memory = (max_binding / instance_bytes.max(1)).min(max_groups as u64) as usize;
    Ok(by_memory.max(1))
}

impl Conv1DGpu {
    fn dispatch(&self, layer: &Conv1DLayer, input: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (batch, steps, _) = input.dim();
        let params = ConvParams {
            batch_size: batch as u32,
            in_channels: layer.in_channels as u32,
            out_channels: layer.filters as u32,
            steps: steps as u32,
            kernel_size: layer.kernel_size as u32,
            pad_before: layer.pad_before() as u32,
            use_bias: layer.bias.is_some() as u32,
            _padding: 0,
        };
        let input_data: Vec<f32> = input.iter().copied().collect();
        let weight_data: Vec<f32> = layer.weights.value.iter().copied().collect();
        let bias_data: Vec<f32> = layer
            .bias
            .as_ref()
            .map(|b| b.value.to_vec())
            .unwrap_or_default();

        let buffers = self.prepare_buffers(&input_data, &weight_data, &bias_data, params);
        let output = pollster::block_on(self.compute(&buffers))?;
        Array3::from_shape_vec((batch, steps, layer.filters), output).map_err(|e| Error::Gpu(e.to_string()))
    }
}

impl ConvExecutor for Conv1DGpu {
    fn conv1d(&self, layer: &Conv1DLayer, input: &Array3<f32>) -> Result<Array3<f32>> {
        let (_, steps, channels) = input.dim();
        if input.is_empty() {
            return Ok(layer.compute(input));
        }
        if channels != layer.in_channels {
            return Err(Error::InvalidInput(format!(
                "layer expects {} input channels, got {}",
                layer.in_channels, channels
            )));
        }

        let chunk = max_dispatch_batch(&self.device.limits(), layer, steps)?;
        let mut outputs = input
            .axis_chunks_iter(Axis(0), chunk)
            .map(|part| self.dispatch(layer, part))
            .collect::<Result<Vec<_>>>()?;
        if outputs.len() == 1 {
            if let Some(output) = outputs.pop() {
                return Ok(output);
            }
        }
        let views: Vec<ArrayView3<f32>> = outputs.iter().map(|o| o.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| Error::Gpu(e.to_string()))
    }

    fn device(&self) -> executor::Device {
        executor::Device::Gpu
    }
}
