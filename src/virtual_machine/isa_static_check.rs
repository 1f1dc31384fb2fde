//! Static checks for ISA stability.
//!
//! These tests ensure that instruction definitions (opcode bytes, mnemonics,
//! encoding formats) remain unchanged across updates. Any modification to the
//! ISA will cause these tests to fail, providing a safety net against
//! accidental changes: guest images encode these bytes.
