//! Build script for inference-bridge.
//!
//! Generates the C header `include/inference_bridge.h` from the exported
//! `extern "C"` functions using cbindgen. Host runtimes that bind by symbol
//! name (P/Invoke, JNA, Dart FFI) do not need the header, so a cbindgen
//! failure only warns.
//!
//! # Environment Variables
//!
//! - `INFERENCE_BRIDGE_SKIP_HEADER`: Set to "1" to skip header generation

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=src/error.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");
    println!("cargo:rerun-if-env-changed=INFERENCE_BRIDGE_SKIP_HEADER");

    if env::var("INFERENCE_BRIDGE_SKIP_HEADER").as_deref() == Ok("1") {
        println!("cargo:warning=Skipping C header generation (INFERENCE_BRIDGE_SKIP_HEADER=1)");
        return;
    }

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR unavailable: {}", e);
            return;
        }
    };

    let config = match cbindgen::Config::from_file(crate_dir.join("cbindgen.toml")) {
        Ok(config) => config,
        Err(e) => {
            println!("cargo:warning=Failed to read cbindgen.toml: {}", e);
            return;
        }
    };

    let include_dir = crate_dir.join("include");
    if let Err(e) = std::fs::create_dir_all(&include_dir) {
        println!("cargo:warning=Failed to create include dir: {}", e);
        return;
    }

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(include_dir.join("inference_bridge.h"));
        }
        Err(e) => {
            println!("cargo:warning=cbindgen failed, C header not generated: {}", e);
        }
    }
}
