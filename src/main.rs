//! Supernova virtual machine runtime.
//!
//! Loads a Zenith executable image and drives one emulated thread to
//! completion.
//!
//! # Usage
//! ```text
//! snvm [options] <image> [-- args...]
//! ```
//!
//! # Options
//! - `-h`, `--help`: display usage
//! - `-v`, `--version`: print the runtime version
//! - `-p`, `--properties`: print the thread-model properties
//!
//! The process exit status is the thread's return status on a successful
//! run, or the loader's numeric status when the image cannot be loaded.

use std::env;
use std::process;

use supernova::utils::log::Logger;
use supernova::virtual_machine::image::load_image;
use supernova::virtual_machine::thread::{
    Thread, HOST_INTERRUPT_COUNT, HOST_MODEL, PCALL_1STRET, PCALL_2NDRET,
};

fn print_usage(program: &str) {
    println!(
        "Supernova v{}: Zenith virtual machine runtime\n\
         usage: {} [options] <image> [-- args...]\n\
         options:\n\
         \x20 -h --help           | display this help\n\
         \x20 -v --version        | print current version\n\
         \x20 -p --properties     | get current virtual machine properties",
        env!("CARGO_PKG_VERSION"),
        program
    );
}

fn print_properties() {
    println!(
        "Properties:\n\
         ===================\n\
         thread model:\n\
         \tflags: 0b{:016b}\n\
         \tpossible interrupt count: {}\n\
         ======================================\n\
         instruction group implementations:\n\
         \tgroup 0: fully implemented\n\
         \tgroup 1: fully implemented\n\
         \tgroup 2: fully implemented\n\
         \tgroup 3: no i/o\n\
         \tgroup 4: not implemented\n\
         \tgroup 5: not implemented\n\
         \tgroup 6: not implemented\n\
         ==============================\n\
         pcall -1:\n\
         \t0:0 -> r14 = 2, r13 = 2^52 - 2\n\
         \t0:1 installs the interrupt vector\n\
         \t1:0 -> r14 = 0, paging not yet implemented\n\
         \t2:0 -> no-op",
        HOST_MODEL.flags, HOST_INTERRUPT_COUNT
    );
}

/// Loads and runs an image, never returning to the caller.
fn run_image(path: &str, rest: &[String]) -> ! {
    let log = Logger::new("snvm");

    let image = match load_image(path) {
        Ok(image) => image,
        Err(err) => {
            log.error(&format!("could not load image {}: {}", path, err));
            process::exit(i32::from(err.status()));
        }
    };

    log.info(&format!(
        "loaded {}: {} bytes of guest memory, entry point {:#x}",
        path, image.memory_size, image.entry_point
    ));

    // Guest arguments follow a `--` separator; only their count crosses
    // into the guest, through the first processor-call return register.
    let guest_args = match rest.iter().position(|arg| arg == "--") {
        Some(pos) => &rest[pos + 1..],
        None => &rest[..0],
    };

    let mut thread = Thread::new(image.memory, &HOST_MODEL, image.entry_point);
    thread.set_reg(PCALL_1STRET, guest_args.len() as u64);
    thread.set_reg(PCALL_2NDRET, 0);

    let outcome = thread.run();
    if outcome.graceful {
        log.info(&format!("program ended with status {}", outcome.status));
    } else {
        log.warn(&format!(
            "thread destroyed before program end, signal {}",
            outcome.status
        ));
    }
    process::exit(outcome.status as i32);
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "-h" || args[1] == "--help" {
        print_usage(args.first().map_or("snvm", String::as_str));
        return;
    }

    match args[1].as_str() {
        "-v" | "--version" => println!("{}", env!("CARGO_PKG_VERSION")),
        "-p" | "--properties" => print_properties(),
        path => run_image(path, &args[2..]),
    }
}
