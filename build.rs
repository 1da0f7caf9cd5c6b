use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Debug builds trace every packet the framing layer consumes
    if env::var("PROFILE").map(|p| p == "debug").unwrap_or(false) {
        println!("cargo:rustc-cfg=feature=\"debug\"");
    }

    // Host builds only carry the protocol core and its tests
    let target = env::var("TARGET").unwrap_or_default();
    if !target.contains("avr") {
        return;
    }

    // Configure for ATmega128
    println!("cargo:rustc-link-arg=-mmcu=atmega128");

    println!("cargo:warning=Building bootloader for ATmega128 at 16MHz");
}
