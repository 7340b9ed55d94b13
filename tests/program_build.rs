//! Program build and kernel creation

mod common;

use clmetal::*;
use common::Fixture;

#[test]
fn test_syntax_error_fails_the_build() {
    let fx = Fixture::new();
    let program = fx
        .runtime
        .create_program_with_source(fx.context, &["__kernel void broken(__global int* x) { x[0] = ; }"])
        .unwrap();
    let err = fx.runtime.build_program(program, &[], "").unwrap_err();
    assert_eq!(err, ClError::BuildProgramFailure);

    let status = fx
        .runtime
        .program_build_info(program, fx.device, CL_PROGRAM_BUILD_STATUS)
        .unwrap();
    assert_eq!(status.as_int(), Some(CL_BUILD_ERROR));
    let log = fx
        .runtime
        .program_build_info(program, fx.device, CL_PROGRAM_BUILD_LOG)
        .unwrap();
    assert!(!log.as_str().unwrap().is_empty());

    let err = fx.runtime.create_kernel(program, "broken").unwrap_err();
    assert_eq!(err, ClError::InvalidProgramExecutable);
}

#[test]
fn test_semantic_error_is_logged() {
    let fx = Fixture::new();
    let program = fx
        .runtime
        .create_program_with_source(fx.context, &["__kernel void k(__global int* x) { x[0] = missing; }"])
        .unwrap();
    assert!(fx.runtime.build_program(program, &[], "").is_err());
    let log = fx
        .runtime
        .program_build_info(program, fx.device, CL_PROGRAM_BUILD_LOG)
        .unwrap();
    assert!(log.as_str().unwrap().contains("missing"));
}

#[test]
fn test_kernel_names_and_count() {
    let fx = Fixture::new();
    let program = fx.program(
        "int helper(int v) { return v + 1; }\n\
         __kernel void first(__global int* x) { x[0] = helper(x[0]); }\n\
         __kernel void second(__global int* x) { x[1] = 2; }",
    );
    let count = fx.runtime.program_info(program, CL_PROGRAM_NUM_KERNELS).unwrap();
    assert_eq!(count.as_size(), Some(2));
    let names = fx.runtime.program_info(program, CL_PROGRAM_KERNEL_NAMES).unwrap();
    assert_eq!(names.as_str(), Some("first;second"));

    let kernels = fx.runtime.create_kernels_in_program(program).unwrap();
    assert_eq!(kernels.len(), 2);
    let name = fx.runtime.kernel_info(kernels[1], CL_KERNEL_FUNCTION_NAME).unwrap();
    assert_eq!(name.as_str(), Some("second"));
    assert!(matches!(
        fx.runtime.create_kernel(program, "helper").unwrap_err(),
        ClError::InvalidKernelName(_)
    ));
}

#[test]
fn test_rebuild_with_live_kernels_is_rejected() {
    let fx = Fixture::new();
    let program = fx.program("__kernel void k(__global int* x) { x[0] = 1; }");
    let kernel = fx.runtime.create_kernel(program, "k").unwrap();

    let err = fx.runtime.build_program(program, &[], "").unwrap_err();
    assert_eq!(err.code(), CL_INVALID_OPERATION);
    let status = fx
        .runtime
        .program_build_info(program, fx.device, CL_PROGRAM_BUILD_STATUS)
        .unwrap();
    assert_eq!(status.as_int(), Some(CL_BUILD_SUCCESS));

    fx.runtime.release_kernel(kernel).unwrap();
    fx.runtime.build_program(program, &[], "-D UNUSED=1").unwrap();
    let options = fx
        .runtime
        .program_build_info(program, fx.device, CL_PROGRAM_BUILD_OPTIONS)
        .unwrap();
    assert_eq!(options.as_str(), Some("-D UNUSED=1"));
}

#[test]
fn test_build_options_define_macros() {
    let fx = Fixture::new();
    let program = fx
        .runtime
        .create_program_with_source(fx.context, &["__kernel void k(__global int* x) { x[0] = WIDTH * 2; }"])
        .unwrap();
    fx.runtime.build_program(program, &[], "-D WIDTH=21").unwrap();
    let kernel = fx.runtime.create_kernel(program, "k").unwrap();
    let mem = fx.buffer(4);
    fx.runtime.set_kernel_arg(kernel, 0, KernelArg::Mem(mem)).unwrap();
    fx.run(kernel, &[1], Some(&[1]));
    assert_eq!(common::to_i32(&fx.read(mem, 4)), vec![42]);
}

#[test]
fn test_unknown_option_is_rejected() {
    let fx = Fixture::new();
    let program = fx
        .runtime
        .create_program_with_source(fx.context, &["__kernel void k() {}"])
        .unwrap();
    let err = fx.runtime.build_program(program, &[], "-O3").unwrap_err();
    assert_eq!(err.code(), CL_INVALID_BUILD_OPTIONS);
}

#[test]
fn test_kernel_arg_info() {
    let fx = Fixture::new();
    let kernel = fx.kernel(
        "__kernel void k(__global const float* restrict in, __local int* tmp, uint n) {}",
        "k",
    );
    let info = |index, param| fx.runtime.kernel_arg_info(kernel, index, param).unwrap();
    assert_eq!(
        info(0, CL_KERNEL_ARG_ADDRESS_QUALIFIER).as_uint(),
        Some(CL_KERNEL_ARG_ADDRESS_GLOBAL)
    );
    assert_eq!(info(0, CL_KERNEL_ARG_TYPE_NAME).as_str(), Some("float*"));
    assert_eq!(info(0, CL_KERNEL_ARG_NAME).as_str(), Some("in"));
    assert_eq!(
        info(1, CL_KERNEL_ARG_ADDRESS_QUALIFIER).as_uint(),
        Some(CL_KERNEL_ARG_ADDRESS_LOCAL)
    );
    assert_eq!(info(2, CL_KERNEL_ARG_TYPE_NAME).as_str(), Some("uint"));
    assert_eq!(
        fx.runtime
            .kernel_arg_info(kernel, 3, CL_KERNEL_ARG_NAME)
            .unwrap_err(),
        ClError::InvalidArgIndex(3)
    );
}
