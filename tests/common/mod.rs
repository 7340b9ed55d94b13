//! Common fixtures for the runtime integration tests
#![allow(dead_code)]

use clmetal::*;

pub fn runtime_with(policy: ContextReleasePolicy) -> Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new(
        RuntimeConfig::builder()
            .backend(BackendSelection::Host)
            .context_release(policy)
            .host_threads(4)
            .build(),
    )
    .unwrap()
}

/// A host runtime with one context and one in-order queue
pub struct Fixture {
    pub runtime: Runtime,
    pub device: DeviceId,
    pub context: ContextId,
    pub queue: QueueId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_policy(ContextReleasePolicy::Strict)
    }

    pub fn with_policy(policy: ContextReleasePolicy) -> Self {
        let runtime = runtime_with(policy);
        let platform = runtime.platform_ids()[0];
        let device = runtime.device_ids(platform, CL_DEVICE_TYPE_ALL).unwrap()[0];
        let context = runtime.create_context(&[device]).unwrap();
        let queue = runtime.create_command_queue(context, device, 0).unwrap();
        Self {
            runtime,
            device,
            context,
            queue,
        }
    }

    pub fn program(&self, source: &str) -> ProgramId {
        let program = self
            .runtime
            .create_program_with_source(self.context, &[source])
            .unwrap();
        if let Err(e) = self.runtime.build_program(program, &[], "") {
            let log = self
                .runtime
                .program_build_info(program, self.device, CL_PROGRAM_BUILD_LOG)
                .unwrap();
            panic!("build failed ({}): {}", e, log.as_str().unwrap_or_default());
        }
        program
    }

    pub fn kernel(&self, source: &str, name: &str) -> KernelId {
        let program = self.program(source);
        self.runtime.create_kernel(program, name).unwrap()
    }

    pub fn buffer(&self, size: usize) -> MemId {
        self.runtime
            .create_buffer(self.context, CL_MEM_READ_WRITE, size, None)
            .unwrap()
    }

    pub fn buffer_from(&self, data: &[u8]) -> MemId {
        self.runtime
            .create_buffer(
                self.context,
                CL_MEM_READ_WRITE | CL_MEM_COPY_HOST_PTR,
                data.len(),
                Some(data),
            )
            .unwrap()
    }

    pub fn read(&self, mem: MemId, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let event = self
            .runtime
            .enqueue_read_buffer(self.queue, mem, 0, &mut out, &[])
            .unwrap();
        self.runtime.release_event(event).unwrap();
        out
    }

    /// Run `kernel` and wait for it
    pub fn run(&self, kernel: KernelId, global: &[usize], local: Option<&[usize]>) {
        let event = self
            .runtime
            .enqueue_nd_range_kernel(self.queue, kernel, global.len() as u32, None, global, local, &[])
            .unwrap();
        self.runtime.wait_for_events(&[event]).unwrap();
        self.runtime.release_event(event).unwrap();
    }
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn to_i32(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
