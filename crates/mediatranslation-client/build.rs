fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = std::path::PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?);
    let repo_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .ok_or("missing repo root")?
        .to_path_buf();
    let proto_dir = repo_root.join("proto");
    let protos = [
        proto_dir.join("google/rpc/status.proto"),
        proto_dir.join("google/cloud/mediatranslation/v1alpha1/media_translation.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }
    // The server half backs the in-process fake service used by tests.
    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&protos, &[proto_dir])?;
    Ok(())
}
