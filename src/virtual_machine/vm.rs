//! Execution engine: typed guest-memory access, processor-call dispatch, and
//! the fetch-decode-execute loop.
//!
//! The engine is a straight interpreter over one [`Thread`]: no host
//! concurrency, no reordering, no native-code generation. Guest faults are
//! not Rust errors; they are in-band state transitions raised through
//! [`Thread::dispatch_pcall`] and delivered through the interrupt vector.

use crate::virtual_machine::instruction::{LInstruction, RInstruction, SInstruction};
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::thread::{
    ProcessorCall, Thread, ThreadDestruction, PCALL_1STRET, PCALL_2NDRET, PCALL_FSWITCH,
    PCALL_INTSPACE, PCALL_INVOPC, REGISTER_COUNT, REG_SP, REG_ZERO,
};


/// Bits of a register not covered by an L-format immediate; `lui` and
/// `auipc` shift their immediate past them.
const UPPER_IMM_SHIFT: u32 = 13;

/// Integer widths guest memory can move in one access.
///
/// Implemented for `u8`, `u16`, `u32` and `u64`; all accesses are
/// little-endian and alignment is not required by the architecture.
pub trait MemoryValue: Copy {
    /// Access width in bytes.
    const SIZE: usize;
    /// The value a faulted fetch returns.
    const ZERO: Self;

    /// Reads a value from exactly `SIZE` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
    /// Writes the value as exactly `SIZE` little-endian bytes.
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_memory_value {
    ($($t:ty),*) => {
        $(
            impl MemoryValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                const ZERO: Self = 0;

                fn read_le(bytes: &[u8]) -> Self {
                    <$t>::from_le_bytes(bytes.try_into().unwrap())
                }

                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_memory_value!(u8, u16, u32, u64);

/// Result of driving a thread to completion.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// True when the program ended by request rather than by destruction.
    pub graceful: bool,
    /// `r1` on graceful exit, the numeric destruction signal otherwise.
    pub status: u64,
}

/// Logical left shift; the result is zero once the amount reaches the
/// register width instead of being undefined.
fn shift_left(value: u64, amount: u64) -> u64 {
    if amount >= u64::BITS as u64 {
        0
    } else {
        value << amount
    }
}

/// Logical right shift with the same capping rule as [`shift_left`].
fn shift_right(value: u64, amount: u64) -> u64 {
    if amount >= u64::BITS as u64 {
        0
    } else {
        value >> amount
    }
}

impl Thread {
    /// Reads a `T` from guest memory at `addr`.
    ///
    /// An access outside memory, including one whose span crosses the end of
    /// the buffer, raises [`ProcessorCall::MemoryLimit`] and returns zero.
    pub fn fetch<T: MemoryValue>(&mut self, addr: u64) -> T {
        match self.span(addr, T::SIZE) {
            Some(range) => T::read_le(&self.memory[range]),
            None => {
                self.dispatch_pcall(ProcessorCall::MemoryLimit);
                T::ZERO
            }
        }
    }

    /// Writes a `T` to guest memory at `addr`.
    ///
    /// Same bounds rule as [`Thread::fetch`]; a rejected store raises
    /// [`ProcessorCall::MemoryLimit`] and writes nothing, partial writes
    /// included.
    pub fn place<T: MemoryValue>(&mut self, addr: u64, value: T) {
        match self.span(addr, T::SIZE) {
            Some(range) => value.write_le(&mut self.memory[range]),
            None => self.dispatch_pcall(ProcessorCall::MemoryLimit),
        }
    }

    /// Bounds-checks an access of `size` bytes starting at `addr`.
    fn span(&self, addr: u64, size: usize) -> Option<std::ops::Range<usize>> {
        let memsize = self.memory.len() as u64;
        if addr >= memsize {
            return None;
        }
        let end = addr.checked_add(size as u64)?;
        if end > memsize {
            return None;
        }
        Some(addr as usize..end as usize)
    }

    /// Hardware push: store at the stack pointer, then grow the stack
    /// downward. The stack pointer moves even if the store faulted.
    fn hwpush(&mut self, value: u64) {
        let sp = self.regs[REG_SP];
        self.place::<u64>(sp, value);
        self.regs[REG_SP] = sp.wrapping_sub(8);
    }

    /// Raises a processor call on the thread.
    ///
    /// `Functions` runs the in-line processor functions and leaves the fault
    /// level alone. Any other kind escalates the fault level
    /// (normal -> kind -> double fault -> triple fault), saves the register
    /// context and program counter on the stack, and vectors into the
    /// handler for `kind`.
    pub fn dispatch_pcall(&mut self, kind: ProcessorCall) {
        if kind == ProcessorCall::Functions {
            self.processor_functions();
            return;
        }

        // Escalation counts raises across dispatches (a handler faulting,
        // the next instruction faulting), not raises out of this dispatch's
        // own context save; those are dropped, which also bounds the
        // cascade when the save itself lands outside memory.
        if self.in_dispatch {
            return;
        }

        // A triple-faulted thread is already condemned.
        if self.signal == ThreadDestruction::InterruptCrashLoop {
            return;
        }

        if self.pcall == ProcessorCall::DoubleFault {
            self.pcall = ProcessorCall::TripleFault;
            self.signal = ThreadDestruction::InterruptCrashLoop;
            return;
        } else if self.pcall != ProcessorCall::NormalExecution {
            self.pcall = ProcessorCall::DoubleFault;
        } else {
            self.pcall = kind;
        }

        self.in_dispatch = true;

        // Each register is read at its own push, so the stack-pointer slot
        // holds the value it had right before being pushed.
        for index in 0..REGISTER_COUNT {
            let value = self.regs[index];
            self.hwpush(value);
        }
        self.hwpush(self.pc);

        self.pc = self.fetch::<u64>(self.intvec.wrapping_add(kind.vector_offset()));

        self.in_dispatch = false;
    }

    /// `pcall -1`: in-line processor functions.
    ///
    /// Selected by the interrupt-space and function-switch registers; no
    /// context save, no fault-level change.
    fn processor_functions(&mut self) {
        let interrupt_space = self.regs[PCALL_INTSPACE];
        let function_switch = self.regs[PCALL_FSWITCH];
        match (interrupt_space, function_switch) {
            // Interrupt-table geometry query.
            (0, 0) => {
                self.regs[PCALL_1STRET] = 2;
                self.regs[PCALL_2NDRET] = self.model.interrupt_count;
            }
            // Install the interrupt vector.
            (0, 1) => self.intvec = self.regs[PCALL_1STRET],
            // Paging query; paging is not implemented.
            (1, _) => self.regs[PCALL_1STRET] = 0,
            _ => {}
        }
    }

    /// Reads the register named by an immediate-as-index operand.
    ///
    /// The immediate field is wider than the register file, so an
    /// out-of-range index reads as zero.
    fn reg_or_zero(&self, index: i64) -> u64 {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.regs.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// `rd <- f(r1, r2)`
    fn apply_r(&mut self, instr: RInstruction, f: impl Fn(u64, u64) -> u64) {
        self.regs[instr.rd()] = f(self.regs[instr.r1()], self.regs[instr.r2()]);
    }

    /// `rd <- f(r1, imm)` with the raw immediate.
    fn apply_s(&mut self, instr: SInstruction, f: impl Fn(u64, u64) -> u64) {
        self.regs[instr.rd()] = f(self.regs[instr.r1()], instr.uimm());
    }

    /// `rd <- f(r1, imm)` with the immediate sign-extended.
    fn apply_s_signed(&mut self, instr: SInstruction, f: impl Fn(u64, i64) -> u64) {
        self.regs[instr.rd()] = f(self.regs[instr.r1()], instr.imm());
    }

    /// Relative branch taken when `cond` holds on `(rd, r1)`.
    fn branch(&mut self, instr: SInstruction, cond: impl Fn(u64, u64) -> bool) {
        if cond(self.regs[instr.rd()], self.regs[instr.r1()]) {
            self.pc = self.pc.wrapping_add(instr.imm() as u64);
        }
    }

    /// Executes exactly one fetch-decode-execute iteration.
    ///
    /// Single-step mode: the destruction signal is not consulted here; the
    /// continuous loop checks it before each iteration.
    pub fn step(&mut self) {
        let word = self.fetch::<u64>(self.pc);
        self.pc = self.pc.wrapping_add(8);

        let r = RInstruction::from_raw(word);
        let s = SInstruction::from_raw(word);
        let l = LInstruction::from_raw(word);

        match Opcode::try_from(r.opcode_byte()) {
            Ok(op) => self.execute(op, r, s, l),
            Err(unknown) => {
                self.regs[PCALL_INVOPC] = unknown.0 as u64;
                self.dispatch_pcall(ProcessorCall::InvalidInstruction);
            }
        }

        self.regs[REG_ZERO] = 0;
    }

    /// Runs the thread until its destruction signal is set.
    ///
    /// Returns gracefully (with `r1` as status) only for
    /// [`ThreadDestruction::ProgramEnd`]; any other signal reports its
    /// numeric value.
    pub fn run(&mut self) -> RunOutcome {
        self.regs[REG_ZERO] = 0;

        while self.signal == ThreadDestruction::DoNotDestroy {
            self.step();
        }

        let graceful = self.signal == ThreadDestruction::ProgramEnd;
        let status = if graceful {
            self.regs[REG_SP]
        } else {
            self.signal as u64
        };
        RunOutcome { graceful, status }
    }

    /// Per-opcode semantics. `op` was decoded from the shared opcode byte
    /// and selects which of the three views is authoritative.
    fn execute(&mut self, op: Opcode, r: RInstruction, s: SInstruction, l: LInstruction) {
        match op {
            // Group 0: bitwise
            Opcode::Andr => self.apply_r(r, |a, b| a & b),
            Opcode::Andi => self.apply_s(s, |a, b| a & b),
            Opcode::Xorr => self.apply_r(r, |a, b| a ^ b),
            Opcode::Xori => self.apply_s(s, |a, b| a ^ b),
            Opcode::Orr => self.apply_r(r, |a, b| a | b),
            Opcode::Ori => self.apply_s(s, |a, b| a | b),
            Opcode::Not => self.regs[r.rd()] = !self.regs[r.r1()],
            Opcode::Cnt => self.apply_s(s, |a, _| u64::from(a.count_ones())),
            Opcode::Llsr => self.apply_r(r, shift_left),
            Opcode::Llsi => self.apply_s(s, shift_left),
            Opcode::Lrsr => self.apply_r(r, shift_right),
            Opcode::Lrsi => self.apply_s(s, shift_right),

            // Group 1: arithmetic / stack
            Opcode::Addr => self.apply_r(r, u64::wrapping_add),
            Opcode::Addi => self.apply_s(s, u64::wrapping_add),
            Opcode::Subr => self.apply_r(r, u64::wrapping_sub),
            Opcode::Subi => self.apply_s(s, u64::wrapping_sub),
            Opcode::Umulr => self.apply_r(r, u64::wrapping_mul),
            Opcode::Umuli => self.apply_s(s, u64::wrapping_mul),
            Opcode::Smulr => {
                self.apply_r(r, |a, b| (a as i64).wrapping_mul(b as i64) as u64)
            }
            Opcode::Smuli => {
                self.apply_s_signed(s, |a, b| (a as i64).wrapping_mul(b) as u64)
            }
            Opcode::Udivr => {
                if self.regs[r.r2()] == 0 {
                    self.dispatch_pcall(ProcessorCall::DivisionByZero);
                } else {
                    self.apply_r(r, |a, b| a / b);
                }
            }
            Opcode::Udivi => {
                // The zero gate reads the register *indexed by* the
                // immediate; the division divides by the immediate value.
                if self.reg_or_zero(s.imm()) == 0 {
                    self.dispatch_pcall(ProcessorCall::DivisionByZero);
                } else {
                    self.apply_s(s, |a, b| a / b);
                }
            }
            Opcode::Sdivr => {
                if self.regs[r.r2()] == 0 {
                    self.dispatch_pcall(ProcessorCall::DivisionByZero);
                } else {
                    self.apply_r(r, |a, b| (a as i64).wrapping_div(b as i64) as u64);
                }
            }
            Opcode::Sdivi => {
                if self.reg_or_zero(s.imm()) == 0 {
                    self.dispatch_pcall(ProcessorCall::DivisionByZero);
                } else {
                    self.apply_s_signed(s, |a, b| (a as i64).wrapping_div(b) as u64);
                }
            }
            Opcode::Call => {
                let sp = self.regs[r.r1()];
                let bp = self.regs[r.r2()];
                self.place::<u64>(sp, bp);
                self.place::<u64>(sp.wrapping_add(8), self.pc.wrapping_add(8));
                self.regs[r.r1()] = sp.wrapping_add(16);
                self.regs[r.r2()] = self.regs[r.r1()];
                // rd is read after the frame update; a target register that
                // aliases SP or BP jumps to the updated value.
                self.pc = self.regs[r.rd()];
            }
            Opcode::Push => {
                // The third operand names a register, not a literal addend.
                let value = self.regs[s.rd()].wrapping_add(self.reg_or_zero(s.uimm() as i64));
                let sp = self.regs[s.r1()];
                self.place::<u64>(sp, value);
                self.regs[s.r1()] = sp.wrapping_add(8);
            }
            Opcode::Retn => {
                let sp = self.regs[r.r1()].wrapping_sub(16);
                self.regs[r.r1()] = sp;
                self.regs[r.r2()] = self.fetch::<u64>(sp);
                self.pc = self.fetch::<u64>(sp.wrapping_add(8));
            }
            Opcode::Pull => {
                let sp = self.regs[s.r1()].wrapping_sub(8);
                self.regs[s.r1()] = sp;
                self.regs[s.rd()] = self.fetch::<u64>(sp);
            }

            // Group 2: loads, stores, branches
            Opcode::Ldb => {
                let addr = self.regs[s.r1()].wrapping_add(s.imm() as u64);
                self.regs[s.rd()] = u64::from(self.fetch::<u8>(addr));
            }
            Opcode::Ldh => {
                let addr = self.regs[s.r1()].wrapping_add(s.imm() as u64);
                self.regs[s.rd()] = u64::from(self.fetch::<u16>(addr));
            }
            Opcode::Ldw => {
                let addr = self.regs[s.r1()].wrapping_add(s.imm() as u64);
                self.regs[s.rd()] = u64::from(self.fetch::<u32>(addr));
            }
            Opcode::Ldd => {
                let addr = self.regs[s.r1()].wrapping_add(s.imm() as u64);
                self.regs[s.rd()] = self.fetch::<u64>(addr);
            }
            Opcode::Stb => {
                let addr = self.regs[s.rd()].wrapping_add(s.imm() as u64);
                self.place::<u8>(addr, self.regs[s.r1()] as u8);
            }
            Opcode::Sth => {
                let addr = self.regs[s.rd()].wrapping_add(s.imm() as u64);
                self.place::<u16>(addr, self.regs[s.r1()] as u16);
            }
            Opcode::Stw => {
                let addr = self.regs[s.rd()].wrapping_add(s.imm() as u64);
                self.place::<u32>(addr, self.regs[s.r1()] as u32);
            }
            Opcode::Std => {
                let addr = self.regs[s.rd()].wrapping_add(s.imm() as u64);
                self.place::<u64>(addr, self.regs[s.r1()]);
            }
            Opcode::Jal => {
                self.regs[l.r1()] = self.pc.wrapping_add(8);
                self.pc = self.pc.wrapping_add(l.imm() as u64);
            }
            Opcode::Jalr => {
                // The link register is written before the base is read, so
                // `jalr rd, rd, imm` branches relative to the link value.
                self.regs[s.rd()] = self.pc.wrapping_add(8);
                self.pc = self
                    .pc
                    .wrapping_add(self.regs[s.r1()])
                    .wrapping_add(s.imm() as u64);
            }
            Opcode::Je => self.branch(s, |a, b| a == b),
            Opcode::Jne => self.branch(s, |a, b| a != b),
            Opcode::Jgu => self.branch(s, |a, b| a > b),
            Opcode::Jgs => self.branch(s, |a, b| (a as i64) > (b as i64)),
            Opcode::Jleu => self.branch(s, |a, b| a <= b),
            Opcode::Jles => self.branch(s, |a, b| (a as i64) <= (b as i64)),

            // Group 3: conditional set, upper immediates, processor calls
            Opcode::Setgur => self.apply_r(r, |a, b| u64::from(a > b)),
            Opcode::Setgui => self.apply_s(s, |a, b| u64::from(a > b)),
            Opcode::Setgsr => self.apply_r(r, |a, b| u64::from((a as i64) > (b as i64))),
            Opcode::Setgsi => self.apply_s_signed(s, |a, b| u64::from((a as i64) > b)),
            Opcode::Setleur => self.apply_r(r, |a, b| u64::from(a <= b)),
            Opcode::Setleui => self.apply_s(s, |a, b| u64::from(a <= b)),
            Opcode::Setlesr => self.apply_r(r, |a, b| u64::from((a as i64) <= (b as i64))),
            Opcode::Setlesi => self.apply_s_signed(s, |a, b| u64::from((a as i64) <= b)),
            Opcode::Lui => self.regs[l.r1()] |= l.uimm() << UPPER_IMM_SHIFT,
            Opcode::Auipc => {
                self.regs[l.r1()] = self.pc.wrapping_add(l.uimm() << UPPER_IMM_SHIFT)
            }
            Opcode::Pcall => self.dispatch_pcall(ProcessorCall::from_immediate(l.imm())),
        }
    }
}
