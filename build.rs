//! Build script compiling the kubelet device-plugin API.
//!
//! Generated code lands in OUT_DIR and is pulled in by `daemon::protocol`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/deviceplugin/v1beta1/api.proto");

    // Fall back to the vendored protoc when the host has none installed
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::configure()
        // DevicePlugin is served, Registration is dialed
        .build_server(true)
        .build_client(true)
        .build_transport(true)
        .compile_protos(
            &["proto/deviceplugin/v1beta1/api.proto"],
            &["proto/deviceplugin/v1beta1/"],
        )?;

    Ok(())
}
