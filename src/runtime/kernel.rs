//! Kernels and their argument slots

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace};

use super::Runtime;
use super::memory::Buffer;
use super::platform::Device;
use super::program::Program;
use crate::backend::{Binding, ComputePipeline};
use crate::compiler::ast::AddressSpace;
use crate::compiler::{KernelSignature, ParamKind};
use crate::error::{ClError, Result};
use crate::handle::{ContextId, DeviceId, Handle, KernelId, MemId, ProgramId};
use crate::info::InfoValue;
use crate::types::*;

const PREFERRED_WORK_GROUP_MULTIPLE: usize = 32;

/// Primitive types that can be passed by value to a kernel
pub trait ScalarArg: Copy {
    fn to_arg_bytes(self) -> Vec<u8>;
}

macro_rules! impl_scalar_arg {
    ($($ty:ty),*) => {
        $(
            impl ScalarArg for $ty {
                fn to_arg_bytes(self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }
            }
        )*
    };
}

impl_scalar_arg!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64);

/// Value for one kernel argument slot
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    /// A buffer for a `__global` or `__constant` pointer parameter
    Mem(MemId),
    /// Bytes of `__local` memory allocated per work-group
    Local(usize),
    /// Raw bytes of a by-value parameter
    Scalar(Vec<u8>),
}

impl KernelArg {
    pub fn scalar<T: ScalarArg>(value: T) -> Self {
        KernelArg::Scalar(value.to_arg_bytes())
    }
}

/// A bound slot, snapshotted at enqueue time
#[derive(Clone)]
enum ArgValue {
    Mem(Arc<Buffer>),
    Bytes(Vec<u8>),
    Local(usize),
}

pub struct Kernel {
    context_id: ContextId,
    program_id: ProgramId,
    program: Arc<Program>,
    signature: KernelSignature,
    /// Bytes of `__local` arrays declared in the kernel body
    static_local_mem: usize,
    pipelines: Vec<(DeviceId, Arc<dyn ComputePipeline>)>,
    args: Mutex<Vec<Option<ArgValue>>>,
}

impl Kernel {
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn args(&self) -> MutexGuard<'_, Vec<Option<ArgValue>>> {
        self.args.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn pipeline(&self, device: DeviceId) -> Option<&Arc<dyn ComputePipeline>> {
        self.pipelines
            .iter()
            .find(|(d, _)| *d == device)
            .map(|(_, p)| p)
    }

    /// Largest work-group the kernel can run with on `device`
    pub(crate) fn max_work_group_size(&self, device: &Device, pipeline: &dyn ComputePipeline) -> usize {
        device
            .descriptor()
            .max_work_group_size
            .min(pipeline.max_total_threads_per_threadgroup())
    }

    /// Static plus argument-sized `__local` memory
    pub(crate) fn local_mem_size(&self) -> usize {
        let dynamic: usize = self
            .args()
            .iter()
            .map(|a| match a {
                Some(ArgValue::Local(len)) => *len,
                _ => 0,
            })
            .sum();
        self.static_local_mem + dynamic
    }

    /// Snapshot every slot as a native binding
    ///
    /// Fails with `InvalidKernelArgs` naming the first unset slot.
    pub(crate) fn bindings(&self) -> Result<Vec<Binding>> {
        self.args()
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(ArgValue::Mem(buffer)) => Ok(Binding::Buffer(buffer.native().clone())),
                Some(ArgValue::Bytes(bytes)) => Ok(Binding::Bytes(bytes.clone())),
                Some(ArgValue::Local(len)) => Ok(Binding::Threadgroup(*len)),
                None => Err(ClError::InvalidKernelArgs(i as u32)),
            })
            .collect()
    }

    fn device_and_pipeline(
        &self,
        device: Option<DeviceId>,
    ) -> Result<(Arc<Device>, &Arc<dyn ComputePipeline>)> {
        let (id, pipeline) = match device {
            Some(id) => self
                .pipelines
                .iter()
                .find(|(d, _)| *d == id)
                .ok_or(ClError::InvalidDevice)?,
            None => self.pipelines.first().ok_or(ClError::InvalidDevice)?,
        };
        let device = self
            .program
            .context()
            .device(*id)
            .ok_or(ClError::InvalidDevice)?
            .clone();
        Ok((device, pipeline))
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        let mut count = self.program.kernel_count();
        *count = count.saturating_sub(1);
    }
}

fn address_qualifier(space: AddressSpace) -> cl_uint {
    match space {
        AddressSpace::Global => CL_KERNEL_ARG_ADDRESS_GLOBAL,
        AddressSpace::Local => CL_KERNEL_ARG_ADDRESS_LOCAL,
        AddressSpace::Constant => CL_KERNEL_ARG_ADDRESS_CONSTANT,
        AddressSpace::Private => CL_KERNEL_ARG_ADDRESS_PRIVATE,
    }
}

impl Runtime {
    /// Create a kernel for the entry point `name` of a built program
    pub fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId> {
        let p = self.resolve::<Program>(program)?;
        let mut count = p.kernel_count();
        let state = p.state();
        let artifact = state.executable()?;
        let signature = artifact
            .kernel(name)
            .ok_or_else(|| ClError::InvalidKernelName(name.to_string()))?
            .clone();
        let pipelines = state
            .libraries
            .iter()
            .map(|(device, library)| Ok((*device, library.new_pipeline(name)?)))
            .collect::<Result<Vec<_>>>()?;
        let static_local_mem = artifact
            .module
            .function(name)
            .map(|(_, f)| f.local_arrays.iter().map(|a| a.elem.size() * a.len).sum())
            .unwrap_or(0);

        let kernel = Kernel {
            context_id: p.context_id(),
            program_id: program,
            program: p.clone(),
            args: Mutex::new(vec![None; signature.params.len()]),
            signature,
            static_local_mem,
            pipelines,
        };
        *count += 1;
        drop(count);
        let id = self.registry.insert_child(Arc::new(kernel))?;
        info!("Created kernel {:?} '{}' from program {:?}", id, name, program);
        Ok(id)
    }

    /// Create one kernel per entry point of a built program
    pub fn create_kernels_in_program(&self, program: ProgramId) -> Result<Vec<KernelId>> {
        let names: Vec<String> = {
            let state = self.resolve::<Program>(program)?.state();
            state
                .executable()?
                .kernels
                .iter()
                .map(|k| k.name.clone())
                .collect()
        };
        names
            .iter()
            .map(|name| self.create_kernel(program, name))
            .collect()
    }

    /// Bind `arg` to slot `index`; the value is copied
    pub fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> Result<()> {
        let k = self.resolve::<Kernel>(kernel)?;
        let param = k
            .signature
            .params
            .get(index as usize)
            .ok_or(ClError::InvalidArgIndex(index))?;
        let value = match (param.kind, arg) {
            (ParamKind::Buffer { .. }, KernelArg::Mem(mem)) => {
                let buffer = self
                    .resolve::<Buffer>(mem)
                    .map_err(|_| ClError::InvalidMemObject)?;
                if buffer.context_id() != k.context_id {
                    return Err(ClError::InvalidMemObject);
                }
                ArgValue::Mem(buffer)
            }
            (ParamKind::Local, KernelArg::Local(0)) => {
                return Err(ClError::InvalidArgSize {
                    index,
                    expected: 1,
                    actual: 0,
                });
            }
            (ParamKind::Local, KernelArg::Local(len)) => ArgValue::Local(len),
            (ParamKind::Scalar(ty), KernelArg::Scalar(bytes)) => {
                if bytes.len() != ty.size() {
                    return Err(ClError::InvalidArgSize {
                        index,
                        expected: ty.size(),
                        actual: bytes.len(),
                    });
                }
                ArgValue::Bytes(bytes)
            }
            (_, other) => {
                debug!(
                    "argument {} of '{}' ({}) cannot take {:?}",
                    index, k.signature.name, param.type_name, other
                );
                return Err(ClError::InvalidArgValue(index));
            }
        };
        trace!("kernel {:?} argument {} set", kernel, index);
        k.args()[index as usize] = Some(value);
        Ok(())
    }

    /// `clSetKernelArg` semantics over a size and an optional value
    ///
    /// Memory-object slots take the handle value as `size_of::<usize>()`
    /// native-endian bytes, `__local` slots take a size and no value.
    pub fn set_kernel_arg_raw(
        &self,
        kernel: KernelId,
        index: u32,
        size: usize,
        value: Option<&[u8]>,
    ) -> Result<()> {
        let k = self.resolve::<Kernel>(kernel)?;
        let param = k
            .signature
            .params
            .get(index as usize)
            .ok_or(ClError::InvalidArgIndex(index))?;
        let arg = match param.kind {
            ParamKind::Buffer { .. } => {
                const HANDLE_SIZE: usize = std::mem::size_of::<usize>();
                if size != HANDLE_SIZE {
                    return Err(ClError::InvalidArgSize {
                        index,
                        expected: HANDLE_SIZE,
                        actual: size,
                    });
                }
                let bytes = value
                    .and_then(|v| <[u8; HANDLE_SIZE]>::try_from(v.get(..HANDLE_SIZE)?).ok())
                    .ok_or(ClError::InvalidArgValue(index))?;
                let mem = MemId::from_raw(usize::from_ne_bytes(bytes) as u64)
                    .ok_or(ClError::InvalidArgValue(index))?;
                KernelArg::Mem(mem)
            }
            ParamKind::Local => {
                if value.is_some() {
                    return Err(ClError::InvalidArgValue(index));
                }
                KernelArg::Local(size)
            }
            ParamKind::Scalar(_) => {
                let bytes = value
                    .and_then(|v| v.get(..size))
                    .ok_or(ClError::InvalidArgValue(index))?;
                KernelArg::Scalar(bytes.to_vec())
            }
        };
        drop(k);
        self.set_kernel_arg(kernel, index, arg)
    }

    pub fn retain_kernel(&self, kernel: KernelId) -> Result<()> {
        self.registry.retain::<Kernel>(kernel)
    }

    pub fn release_kernel(&self, kernel: KernelId) -> Result<()> {
        self.release::<Kernel>(kernel)
    }

    pub fn kernel_info(&self, kernel: KernelId, param: cl_kernel_info) -> Result<InfoValue> {
        let k = self.resolve::<Kernel>(kernel)?;
        Ok(match param {
            CL_KERNEL_FUNCTION_NAME => InfoValue::String(k.signature.name.clone()),
            CL_KERNEL_NUM_ARGS => InfoValue::Uint(k.signature.params.len() as cl_uint),
            CL_KERNEL_REFERENCE_COUNT => InfoValue::Uint(self.registry.ref_count::<Kernel>(kernel)?),
            CL_KERNEL_CONTEXT => InfoValue::Handle(k.context_id.raw()),
            CL_KERNEL_PROGRAM => InfoValue::Handle(k.program_id.raw()),
            CL_KERNEL_ATTRIBUTES => InfoValue::String(k.signature.attributes.clone()),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }

    pub fn kernel_arg_info(
        &self,
        kernel: KernelId,
        index: u32,
        param: cl_kernel_arg_info,
    ) -> Result<InfoValue> {
        let k = self.resolve::<Kernel>(kernel)?;
        let arg = k
            .signature
            .params
            .get(index as usize)
            .ok_or(ClError::InvalidArgIndex(index))?;
        Ok(match param {
            CL_KERNEL_ARG_ADDRESS_QUALIFIER => InfoValue::Uint(address_qualifier(arg.address_space)),
            CL_KERNEL_ARG_ACCESS_QUALIFIER => InfoValue::Uint(CL_KERNEL_ARG_ACCESS_NONE),
            CL_KERNEL_ARG_TYPE_NAME => InfoValue::String(arg.type_name.clone()),
            CL_KERNEL_ARG_TYPE_QUALIFIER => {
                let mut bits = CL_KERNEL_ARG_TYPE_NONE;
                if arg.is_const {
                    bits |= CL_KERNEL_ARG_TYPE_CONST;
                }
                if arg.is_restrict {
                    bits |= CL_KERNEL_ARG_TYPE_RESTRICT;
                }
                if arg.is_volatile {
                    bits |= CL_KERNEL_ARG_TYPE_VOLATILE;
                }
                InfoValue::Bitfield(bits)
            }
            CL_KERNEL_ARG_NAME => InfoValue::String(arg.name.clone()),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }

    /// Work-group limits of `kernel` on `device` (its only device when `None`)
    pub fn kernel_work_group_info(
        &self,
        kernel: KernelId,
        device: Option<DeviceId>,
        param: cl_kernel_work_group_info,
    ) -> Result<InfoValue> {
        let k = self.resolve::<Kernel>(kernel)?;
        let (dev, pipeline) = k.device_and_pipeline(device)?;
        Ok(match param {
            CL_KERNEL_WORK_GROUP_SIZE => {
                InfoValue::Size(k.max_work_group_size(&dev, pipeline.as_ref()))
            }
            CL_KERNEL_COMPILE_WORK_GROUP_SIZE => {
                InfoValue::SizeArray(k.signature.reqd_work_group_size.unwrap_or([0; 3]).to_vec())
            }
            CL_KERNEL_LOCAL_MEM_SIZE => InfoValue::Ulong(k.local_mem_size() as u64),
            CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE => {
                InfoValue::Size(PREFERRED_WORK_GROUP_MULTIPLE)
            }
            CL_KERNEL_PRIVATE_MEM_SIZE => InfoValue::Ulong(0),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::host_runtime;

    const SOURCE: &str = "__kernel __attribute__((reqd_work_group_size(4, 1, 1)))\n\
                          void scale(__global float* restrict data, const float factor,\n\
                                     __local float* scratch) {\n\
                              __local int tile[16];\n\
                              data[get_global_id(0)] *= factor;\n\
                          }\n\
                          __kernel void other(__constant int* table) {}\n";

    struct Fixture {
        runtime: Runtime,
        context: ContextId,
        program: ProgramId,
    }

    fn fixture() -> Fixture {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let program = runtime
            .create_program_with_source(context, &[SOURCE])
            .unwrap();
        runtime.build_program(program, &[], "").unwrap();
        Fixture {
            runtime,
            context,
            program,
        }
    }

    #[test]
    fn test_create_requires_build_and_name() {
        let f = fixture();
        assert_eq!(
            f.runtime.create_kernel(f.program, "missing").err(),
            Some(ClError::InvalidKernelName("missing".to_string()))
        );
        let unbuilt = f
            .runtime
            .create_program_with_source(f.context, &[SOURCE])
            .unwrap();
        assert_eq!(
            f.runtime.create_kernel(unbuilt, "scale").err(),
            Some(ClError::InvalidProgramExecutable)
        );
        let all = f.runtime.create_kernels_in_program(f.program).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_argument_rules() {
        let f = fixture();
        let kernel = f.runtime.create_kernel(f.program, "scale").unwrap();
        let mem = f.runtime.create_buffer(f.context, 0, 64, None).unwrap();
        let rt = &f.runtime;

        rt.set_kernel_arg(kernel, 0, KernelArg::Mem(mem)).unwrap();
        rt.set_kernel_arg(kernel, 1, KernelArg::scalar(2.0f32)).unwrap();
        rt.set_kernel_arg(kernel, 2, KernelArg::Local(32)).unwrap();

        assert_eq!(
            rt.set_kernel_arg(kernel, 3, KernelArg::scalar(1i32)).err(),
            Some(ClError::InvalidArgIndex(3))
        );
        assert_eq!(
            rt.set_kernel_arg(kernel, 1, KernelArg::scalar(2.0f64)).err(),
            Some(ClError::InvalidArgSize {
                index: 1,
                expected: 4,
                actual: 8
            })
        );
        assert_eq!(
            rt.set_kernel_arg(kernel, 0, KernelArg::scalar(1u64)).err(),
            Some(ClError::InvalidArgValue(0))
        );
        let unknown = MemId::from_raw(9999).unwrap();
        assert_eq!(
            rt.set_kernel_arg(kernel, 0, KernelArg::Mem(unknown)).err(),
            Some(ClError::InvalidMemObject)
        );
        assert_eq!(
            rt.set_kernel_arg(kernel, 2, KernelArg::Local(0)).unwrap_err().code(),
            CL_INVALID_ARG_SIZE
        );
    }

    #[test]
    fn test_raw_argument_rules() {
        let f = fixture();
        let kernel = f.runtime.create_kernel(f.program, "scale").unwrap();
        let mem = f.runtime.create_buffer(f.context, 0, 64, None).unwrap();
        let rt = &f.runtime;
        let handle = (mem.raw() as usize).to_ne_bytes();

        rt.set_kernel_arg_raw(kernel, 0, handle.len(), Some(&handle))
            .unwrap();
        assert_eq!(
            rt.set_kernel_arg_raw(kernel, 0, handle.len(), None).err(),
            Some(ClError::InvalidArgValue(0))
        );
        assert_eq!(
            rt.set_kernel_arg_raw(kernel, 0, handle.len(), Some(&0usize.to_ne_bytes()))
                .err(),
            Some(ClError::InvalidArgValue(0))
        );
        assert_eq!(
            rt.set_kernel_arg_raw(kernel, 2, 16, Some(&[0; 16])).err(),
            Some(ClError::InvalidArgValue(2))
        );
        rt.set_kernel_arg_raw(kernel, 2, 16, None).unwrap();
        assert_eq!(
            rt.set_kernel_arg_raw(kernel, 1, 4, None).err(),
            Some(ClError::InvalidArgValue(1))
        );
        rt.set_kernel_arg_raw(kernel, 1, 4, Some(&1.5f32.to_ne_bytes()))
            .unwrap();
        let k = rt.resolve::<Kernel>(kernel).unwrap();
        assert_eq!(k.bindings().unwrap().len(), 3);
    }

    #[test]
    fn test_unset_argument_is_reported() {
        let f = fixture();
        let kernel = f.runtime.create_kernel(f.program, "scale").unwrap();
        f.runtime
            .set_kernel_arg(kernel, 1, KernelArg::scalar(1.0f32))
            .unwrap();
        let k = f.runtime.resolve::<Kernel>(kernel).unwrap();
        assert_eq!(k.bindings().err(), Some(ClError::InvalidKernelArgs(0)));
    }

    #[test]
    fn test_info_queries() {
        let f = fixture();
        let kernel = f.runtime.create_kernel(f.program, "scale").unwrap();
        let rt = &f.runtime;
        assert_eq!(
            rt.kernel_info(kernel, CL_KERNEL_NUM_ARGS).unwrap().as_uint(),
            Some(3)
        );
        assert_eq!(
            rt.kernel_info(kernel, CL_KERNEL_ATTRIBUTES)
                .unwrap()
                .as_str(),
            Some("reqd_work_group_size(4,1,1)")
        );
        assert_eq!(
            rt.kernel_info(kernel, CL_KERNEL_PROGRAM)
                .unwrap()
                .as_handle(),
            Some(f.program.raw())
        );
        assert_eq!(
            rt.kernel_arg_info(kernel, 0, CL_KERNEL_ARG_ADDRESS_QUALIFIER)
                .unwrap()
                .as_uint(),
            Some(CL_KERNEL_ARG_ADDRESS_GLOBAL)
        );
        assert_eq!(
            rt.kernel_arg_info(kernel, 0, CL_KERNEL_ARG_TYPE_QUALIFIER)
                .unwrap()
                .as_bitfield(),
            Some(CL_KERNEL_ARG_TYPE_RESTRICT)
        );
        assert_eq!(
            rt.kernel_arg_info(kernel, 2, CL_KERNEL_ARG_ADDRESS_QUALIFIER)
                .unwrap()
                .as_uint(),
            Some(CL_KERNEL_ARG_ADDRESS_LOCAL)
        );
        assert_eq!(
            rt.kernel_arg_info(kernel, 1, CL_KERNEL_ARG_NAME)
                .unwrap()
                .as_str(),
            Some("factor")
        );
        assert_eq!(
            rt.kernel_arg_info(kernel, 5, CL_KERNEL_ARG_NAME).err(),
            Some(ClError::InvalidArgIndex(5))
        );

        assert_eq!(
            rt.kernel_work_group_info(kernel, None, CL_KERNEL_COMPILE_WORK_GROUP_SIZE)
                .unwrap(),
            InfoValue::SizeArray(vec![4, 1, 1])
        );
        assert_eq!(
            rt.kernel_work_group_info(kernel, None, CL_KERNEL_LOCAL_MEM_SIZE)
                .unwrap()
                .as_ulong(),
            Some(64)
        );
        rt.set_kernel_arg(kernel, 2, KernelArg::Local(32)).unwrap();
        assert_eq!(
            rt.kernel_work_group_info(kernel, None, CL_KERNEL_LOCAL_MEM_SIZE)
                .unwrap()
                .as_ulong(),
            Some(96)
        );
        let max = rt
            .kernel_work_group_info(kernel, None, CL_KERNEL_WORK_GROUP_SIZE)
            .unwrap()
            .as_size()
            .unwrap();
        assert!(max >= 1);
    }

    #[test]
    fn test_live_kernels_block_rebuild() {
        let f = fixture();
        let kernel = f.runtime.create_kernel(f.program, "other").unwrap();
        assert_eq!(
            f.runtime.build_program(f.program, &[], "").unwrap_err().code(),
            CL_INVALID_OPERATION
        );
        f.runtime.release_kernel(kernel).unwrap();
        f.runtime.build_program(f.program, &[], "").unwrap();
    }
}
