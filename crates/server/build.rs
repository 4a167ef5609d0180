fn main() {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("failed to locate vendored protoc"),
    );
    tonic_build::compile_protos("proto/vicinity.proto")
        .unwrap_or_else(|e| panic!("failed to compile vicinity.proto: {e}"));
}
