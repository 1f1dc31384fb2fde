//! The Supernova virtual machine: a 64-bit RISC-style register machine.
//!
//! One emulated [`Thread`](thread::Thread) executes fixed-width 64-bit
//! instructions over a linear byte-addressable memory, with CPU-like fault
//! semantics (normal -> fault -> double fault -> triple fault) delivered
//! through an in-memory interrupt vector. Guest programs arrive as image
//! files materialised by the [`image`] loader.
//!
//! # Architecture
//!
//! - **Registers**: sixteen 64-bit registers, `r0` hardwired to zero
//! - **Instruction format**: three fixed 64-bit encodings (R, S, L)
//! - **Execution model**: straight interpretation, one thread per executor
//!
//! # Modules
//!
//! - [`isa`]: opcode table and encoding formats
//! - [`instruction`]: the R/S/L instruction views
//! - [`thread`]: thread state, model descriptor, fault and signal enums
//! - [`vm`]: memory access, processor calls, and the execution loop
//! - [`image`]: executable image format and loader
//! - [`errors`]: loader error taxonomy

pub mod errors;
pub mod image;
pub mod instruction;
pub mod isa;
mod isa_static_check;
pub mod thread;
pub mod vm;
