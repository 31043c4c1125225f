/// Builds the gRPC client and server code for the `log.proto` definition using
/// `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`, alongside an encoded file descriptor set used by the
/// reflection service.
///
/// # Byte Field Optimization
///
/// The `value` field of `Record` is decoded as `Bytes` (from the `bytes`
/// crate) instead of `Vec<u8>`, so record payloads pass from the wire to the
/// log and back without extra copies.
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("log.v1");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("log_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".log.v1.Record.value"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/log.proto"], &["proto"])
        .unwrap();
}
