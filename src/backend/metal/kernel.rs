//! Metal command queue and dispatch

use metal::{CommandQueue, MTLSize};

use super::buffer::MetalBuffer;
use super::compiler::MetalPipeline;
use crate::backend::traits::{BackendError, Binding, ComputePipeline, DispatchGrid, NativeQueue};

/// Metal requires threadgroup memory lengths in multiples of 16 bytes
const THREADGROUP_ALIGN: usize = 16;

pub struct MetalQueue {
    queue: CommandQueue,
}

impl MetalQueue {
    pub(crate) fn new(queue: CommandQueue) -> Self {
        Self { queue }
    }
}

fn mtl_size(v: [usize; 3]) -> MTLSize {
    MTLSize::new(v[0] as u64, v[1] as u64, v[2] as u64)
}

impl NativeQueue for MetalQueue {
    fn dispatch(
        &self,
        pipeline: &dyn ComputePipeline,
        bindings: &[Binding],
        grid: &DispatchGrid,
    ) -> Result<(), BackendError> {
        let pipeline = pipeline
            .as_any()
            .downcast_ref::<MetalPipeline>()
            .ok_or_else(|| BackendError::Execution("pipeline type mismatch".to_string()))?;

        let command_buffer = self.queue.new_command_buffer();
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(pipeline.state());

        let mut threadgroup_index = 0u64;
        for (i, binding) in bindings.iter().enumerate() {
            match binding {
                Binding::Buffer(buffer) => {
                    let buffer = buffer
                        .as_any()
                        .downcast_ref::<MetalBuffer>()
                        .ok_or_else(|| {
                            BackendError::Execution(format!(
                                "argument {} is not a Metal buffer",
                                i
                            ))
                        })?;
                    encoder.set_buffer(i as u64, Some(buffer.mtl_buffer()), 0);
                }
                Binding::Bytes(bytes) => {
                    encoder.set_bytes(
                        i as u64,
                        bytes.len() as u64,
                        bytes.as_ptr() as *const std::ffi::c_void,
                    );
                }
                Binding::Threadgroup(len) => {
                    let len = len.div_ceil(THREADGROUP_ALIGN) * THREADGROUP_ALIGN;
                    encoder.set_threadgroup_memory_length(threadgroup_index, len as u64);
                    threadgroup_index += 1;
                }
            }
        }

        // Dispatch info follows the kernel parameters
        let info: [u32; 4] = [
            grid.work_dim,
            grid.global_offset[0] as u32,
            grid.global_offset[1] as u32,
            grid.global_offset[2] as u32,
        ];
        encoder.set_bytes(
            bindings.len() as u64,
            std::mem::size_of_val(&info) as u64,
            info.as_ptr() as *const std::ffi::c_void,
        );

        encoder.dispatch_thread_groups(mtl_size(grid.num_groups()), mtl_size(grid.local_size));
        encoder.end_encoding();
        command_buffer.commit();
        command_buffer.wait_until_completed();

        if command_buffer.status() == metal::MTLCommandBufferStatus::Error {
            return Err(BackendError::Execution(
                "Metal command buffer execution failed".to_string(),
            ));
        }
        Ok(())
    }
}

// Safety: MTLCommandQueue is thread-safe
unsafe impl Send for MetalQueue {}
unsafe impl Sync for MetalQueue {}
