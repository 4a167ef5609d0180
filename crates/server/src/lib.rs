//! vicinity-server: gRPC server for the vicinity engine.
//!
//! Hosts the `vicinity.v1.Vicinity` service. Engine logic lives in
//! `vicinity-core`; this crate only translates RPCs and owns the runtime.

pub mod proto {
    //! Generated protobuf types and service traits.
    tonic::include_proto!("vicinity.v1");
}

/// RPC handlers over the index manager.
pub mod service;

pub use service::VicinityService;
