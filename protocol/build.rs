use protobuf_codegen::Codegen;

fn main() {
    Codegen::new()
        .pure()
        .cargo_out_dir("generated")
        .input("src/protos/hub.proto")
        .include("src/protos")
        .run_from_script();
}
