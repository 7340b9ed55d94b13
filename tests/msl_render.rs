//! Metal Shading Language rendering of whole programs

use clmetal::backend::metal::render;
use clmetal::compiler::{BuildOptions, ClcTranslator, Translator};

fn msl(source: &str) -> (String, Vec<String>) {
    let translation = ClcTranslator
        .translate(source, &BuildOptions::default())
        .unwrap();
    let (code, warnings) = render(&translation.artifact.module).unwrap();
    (code.into_inner(), warnings)
}

#[test]
fn test_reduction_program() {
    let (code, warnings) = msl(r#"
        float twice(float v) {
            return v * 2.0f;
        }

        __kernel void reduce(__global const float* in, __global float* out, __local float* scratch) {
            size_t lid = get_local_id(0);
            scratch[lid] = twice(in[get_global_id(0)]);
            barrier(CLK_LOCAL_MEM_FENCE);
            if (lid == 0) {
                out[get_group_id(0)] = scratch[0];
            }
        }
    "#);
    assert!(warnings.is_empty());
    assert!(code.contains("#include <metal_stdlib>"));
    assert!(code.contains("kernel void reduce("));
    assert!(code.contains("device const float* in [[buffer(0)]]"));
    assert!(code.contains("device float* out [[buffer(1)]]"));
    assert!(code.contains("threadgroup float* scratch [[threadgroup(0)]]"));
    assert!(code.contains("threadgroup_barrier(mem_flags::mem_threadgroup)"));
    assert!(code.contains("twice(_item, "));
}

#[test]
fn test_every_kernel_is_rendered() {
    let (code, _) = msl(
        "__kernel void first(__global int* x) { x[0] = 1; }\n\
         __kernel void second(__global int* x) { x[1] = 2; }",
    );
    assert!(code.contains("kernel void first("));
    assert!(code.contains("kernel void second("));
}

#[test]
fn test_double_precision_parameters_are_rejected() {
    let translation = ClcTranslator
        .translate(
            "__kernel void k(__global double* x) { x[0] = 1.0; }",
            &BuildOptions::default(),
        )
        .unwrap();
    assert!(render(&translation.artifact.module).is_err());
}
