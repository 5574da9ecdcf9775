use std::{env, path::PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var("PROTOC").is_err() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|err| format!("vendored protoc unavailable: {err:?}"))?;
        env::set_var("PROTOC", protoc);
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("calculator_descriptor.bin"))
        .compile(&["proto/calculator.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/calculator.proto");
    Ok(())
}
