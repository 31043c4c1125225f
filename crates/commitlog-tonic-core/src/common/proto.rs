//! Generated protobuf messages and gRPC stubs for the `log.v1` package.

#![allow(clippy::all, clippy::pedantic)]

tonic::include_proto!("log.v1");

/// Encoded descriptor set for `log.v1`, served by gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("log_descriptor");
