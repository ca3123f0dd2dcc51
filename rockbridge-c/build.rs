extern crate cbindgen;

use std::path::Path;

fn main() {
    let include_dir = Path::new("include");
    std::fs::create_dir_all(include_dir).expect("Unable to create include directory");

    cbindgen::generate(".")
        .expect("Unable to generate bindings")
        .write_to_file(include_dir.join("rockbridge.h"));
}
