/// Generates the message types and client of `proto/test.proto`.
///
/// Messages get `prost::Name` impls and serde derives, since views read
/// requests and build responses through their serde form. No server trait is
/// generated: the dispatch table in `tonic-views` stands in for it.
///
/// The encoded descriptor set is written next to the generated code and
/// exposed as `FILE_DESCRIPTOR_SET` for stub registration and reflection.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("test_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config
        .enable_type_names()
        .type_attribute(
            ".test",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(default)]",
        )
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .build_server(false)
        .compile_with_config(config, &["proto/test.proto"], &["proto"])
        .unwrap();
}
