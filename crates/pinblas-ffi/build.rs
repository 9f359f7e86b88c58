//! Selects and links the native BLAS backend.
//!
//! One of the `openblas`, `accelerate` or `cblas` features picks the library.
//! When one is enabled the `native_blas` cfg is set, which switches
//! `DefaultKernel` to the native kernel. Extra search paths can be given
//! through `PINBLAS_BLAS_LIB_DIR`.

use std::env;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(native_blas)");
    println!("cargo:rerun-if-env-changed=PINBLAS_BLAS_LIB_DIR");

    let feature = |name: &str| env::var_os(format!("CARGO_FEATURE_{name}")).is_some();
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    let library = if feature("OPENBLAS") {
        Some(("openblas", "dylib"))
    } else if feature("ACCELERATE") && target_os == "macos" {
        Some(("Accelerate", "framework"))
    } else if feature("CBLAS") {
        Some(("cblas", "dylib"))
    } else {
        if feature("ACCELERATE") {
            println!(
                "cargo:warning=the `accelerate` feature only applies to macOS; \
                 using the reference kernel"
            );
        }
        None
    };

    let Some((name, kind)) = library else {
        return;
    };

    if let Ok(lib_dir) = env::var("PINBLAS_BLAS_LIB_DIR") {
        println!("cargo:rustc-link-search=native={lib_dir}");
    } else if name == "openblas" && target_os == "macos" {
        // Homebrew default path on Apple Silicon
        println!("cargo:rustc-link-search=native=/opt/homebrew/opt/openblas/lib");
        // Homebrew default path on Intel
        println!("cargo:rustc-link-search=native=/usr/local/opt/openblas/lib");
    }

    println!("cargo:rustc-link-lib={kind}={name}");
    println!("cargo:rustc-cfg=native_blas");
}
