// This is the place for the basic processor implementation: the evaluation
// loop, operand fetch and writeback, the stacks, and the exception machinery.
// The per-opcode semantics live in the instructions module; the parser turns
// header halfwords into the rich types both sides share.

use crate::bus::Bus;
use crate::fields::{Condition, OperandKind, Size, Value};
use crate::memory::{Memory, PhysSpan, MEMORY_ROM_START};
use crate::mmu::Mmu;
use crate::parser::{disassemble, parse_instruction};
use thiserror::Error;

pub const CPU_HZ: u32 = 33_000_000;

pub const REGISTER_COUNT: usize = 32;
pub const REGISTER_LOOP: usize = 31;

pub const POINTER_DEFAULT_INSTR: u32 = MEMORY_ROM_START;
pub const POINTER_DEFAULT_STACK: u32 = 0x0000_0000;

pub const EXCEPTION_DIVZERO: u16 = 256;
pub const EXCEPTION_ILLEGAL: u16 = 257;
pub const EXCEPTION_FAULT_RD: u16 = 258;
pub const EXCEPTION_FAULT_WR: u16 = 259;
pub const EXCEPTION_DEBUGGER: u16 = 260;
pub const EXCEPTION_BUS: u16 = 261;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("internal error")]
    Internal,
    #[error("breakpoint reached")]
    Debugger,
    #[error("fault while reading memory")]
    FaultRead,
    #[error("fault while writing memory")]
    FaultWrite,
    #[error("invalid opcode")]
    BadOpcode,
    #[error("invalid condition")]
    BadCondition,
    #[error("invalid register")]
    BadRegister,
    #[error("write to immediate")]
    BadImmediate,
    #[error("division by zero")]
    DivZero,
    #[error("io read failed")]
    IoRead,
    #[error("io write failed")]
    IoWrite,
    #[error("interrupts disabled")]
    NoInterrupts,
    #[error("error is not recoverable")]
    CantRecover,
}

pub struct Cpu {
    pub pc: u32,                      // Address of the current instruction
    pub pc_next: u32,                 // Scratch pointer advanced while decoding, committed on success
    pub sp: u32,                      // Stack pointer
    pub esp: u32,                     // Exception stack pointer
    pub fp: u32,                      // Frame pointer
    pub regs: [u32; REGISTER_COUNT],  // General purpose registers; R31 doubles as the loop counter

    pub flag_zero: bool,
    pub flag_carry: bool,
    pub flag_interrupt: bool,
    pub flag_swap_sp: bool,

    pub halted: bool,
    pub debug: bool,

    pub exception_operand: u32,

    pub mmu: Mmu,
    pub mem: Memory,
}

impl Cpu {
    pub fn new(memory_size: usize) -> Cpu {
        Cpu {
            pc: POINTER_DEFAULT_INSTR,
            pc_next: 0,
            sp: POINTER_DEFAULT_STACK,
            esp: 0,
            fp: 0,
            regs: [0; REGISTER_COUNT],
            flag_zero: false,
            flag_carry: false,
            flag_interrupt: false,
            flag_swap_sp: false,
            halted: true,
            debug: false,
            exception_operand: 0,
            mmu: Mmu::new(),
            mem: Memory::new(memory_size),
        }
    }

    pub fn flags_byte(&self) -> u8 {
        ((self.flag_swap_sp as u8) << 3)
            | ((self.flag_interrupt as u8) << 2)
            | ((self.flag_carry as u8) << 1)
            | (self.flag_zero as u8)
    }
    pub fn set_flags_byte(&mut self, flags: u8) {
        self.flag_zero = flags & 1 != 0;
        self.flag_carry = flags & 2 != 0;
        self.flag_interrupt = flags & 4 != 0;
        self.flag_swap_sp = flags & 8 != 0;
    }

    // Resolve a virtual range to a physical span, translating through the
    // TLB when the MMU is on. Faults record the virtual address in
    // `exception_operand` for the eventual exception frame.
    fn resolve(&mut self, address: u32, size: u32, write: bool) -> Result<PhysSpan, VmError> {
        let physical = if self.mmu.enabled {
            match self.mmu.translate(&self.mem, address) {
                Some(entry) => (entry.physical_base & 0xFFFF_F000) | (address & 0xFFF),
                None => return Err(self.fault(address, write)),
            }
        } else {
            address
        };
        match self.mem.resolve(physical, size, write) {
            Some(span) => Ok(span),
            None => Err(self.fault(address, write)),
        }
    }
    fn fault(&mut self, address: u32, write: bool) -> VmError {
        self.exception_operand = address;
        if write {
            VmError::FaultWrite
        } else {
            VmError::FaultRead
        }
    }

    pub fn read8(&mut self, address: u32) -> Result<u8, VmError> {
        match self.resolve(address, 1, false)? {
            PhysSpan::Ram(offset) => Ok(self.mem.ram[offset]),
            PhysSpan::Rom(offset) => Ok(self.mem.rom[offset]),
        }
    }
    pub fn read16(&mut self, address: u32) -> Result<u16, VmError> {
        match self.resolve(address, 2, false)? {
            PhysSpan::Ram(offset) => {
                Ok(u16::from_le_bytes([self.mem.ram[offset], self.mem.ram[offset + 1]]))
            }
            PhysSpan::Rom(offset) => {
                Ok(u16::from_le_bytes([self.mem.rom[offset], self.mem.rom[offset + 1]]))
            }
        }
    }
    pub fn read32(&mut self, address: u32) -> Result<u32, VmError> {
        match self.resolve(address, 4, false)? {
            PhysSpan::Ram(offset) => {
                let bytes = &self.mem.ram[offset..offset + 4];
                Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            PhysSpan::Rom(offset) => {
                let bytes = &self.mem.rom[offset..offset + 4];
                Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        }
    }

    pub fn write8(&mut self, address: u32, value: u8) -> Result<(), VmError> {
        match self.resolve(address, 1, true)? {
            PhysSpan::Ram(offset) => {
                self.mem.ram[offset] = value;
                Ok(())
            }
            PhysSpan::Rom(_) => Err(VmError::Internal),
        }
    }
    pub fn write16(&mut self, address: u32, value: u16) -> Result<(), VmError> {
        match self.resolve(address, 2, true)? {
            PhysSpan::Ram(offset) => {
                self.mem.ram[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            PhysSpan::Rom(_) => Err(VmError::Internal),
        }
    }
    pub fn write32(&mut self, address: u32, value: u32) -> Result<(), VmError> {
        match self.resolve(address, 4, true)? {
            PhysSpan::Ram(offset) => {
                self.mem.ram[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            PhysSpan::Rom(_) => Err(VmError::Internal),
        }
    }

    pub fn read_value(&mut self, address: u32, size: Size) -> Result<Value, VmError> {
        Ok(match size {
            Size::Byte => Value::Byte(self.read8(address)?),
            Size::Half => Value::Half(self.read16(address)?),
            Size::Word => Value::Word(self.read32(address)?),
        })
    }
    pub fn write_value(&mut self, address: u32, value: Value) -> Result<(), VmError> {
        match value {
            Value::Byte(b) => self.write8(address, b),
            Value::Half(h) => self.write16(address, h),
            Value::Word(w) => self.write32(address, w),
        }
    }

    // The stack pointer moves before the access, so a faulting push or pop
    // leaves it moved; handlers see the architectural behavior.
    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        self.sp = self.sp.wrapping_sub(value.size().bytes());
        self.write_value(self.sp, value)
    }
    pub fn pop(&mut self, size: Size) -> Result<Value, VmError> {
        let previous = self.sp;
        self.sp = self.sp.wrapping_add(size.bytes());
        self.read_value(previous, size)
    }

    fn local(&mut self, index: u8) -> Result<&mut u32, VmError> {
        match index as usize {
            n if n < REGISTER_COUNT => Ok(&mut self.regs[n]),
            n if n == REGISTER_COUNT => Ok(&mut self.sp),
            n if n == REGISTER_COUNT + 1 => Ok(&mut self.esp),
            n if n == REGISTER_COUNT + 2 => Ok(&mut self.fp),
            _ => Err(VmError::BadRegister),
        }
    }

    pub fn source(&mut self, size: Size, kind: OperandKind) -> Result<Value, VmError> {
        self.fetch_source(size, kind, true)
    }
    // Reads the operand without consuming its parameter bytes; used for
    // read-modify-write targets.
    pub fn source_stay(&mut self, size: Size, kind: OperandKind) -> Result<Value, VmError> {
        self.fetch_source(size, kind, false)
    }
    fn fetch_source(&mut self, size: Size, kind: OperandKind, advance: bool) -> Result<Value, VmError> {
        let base = self.pc_next;
        if advance {
            self.pc_next = self.pc_next.wrapping_add(kind.param_bytes(size));
        }
        match kind {
            OperandKind::Reg => {
                let index = self.read8(base)?;
                let value = *self.local(index)?;
                Ok(size.from(value))
            }
            OperandKind::RegPtr => {
                let index = self.read8(base)?;
                let address = *self.local(index)?;
                self.read_value(address, size)
            }
            OperandKind::Imm => self.read_value(base, size),
            OperandKind::ImmPtr => {
                let address = self.read32(base)?;
                self.read_value(address, size)
            }
        }
    }

    pub fn target(&mut self, size: Size, kind: OperandKind, value: Value) -> Result<(), VmError> {
        self.write_target(size, kind, value, false)
    }
    pub fn target_zero(&mut self, size: Size, kind: OperandKind, value: Value) -> Result<(), VmError> {
        self.write_target(size, kind, value, true)
    }
    fn write_target(
        &mut self,
        size: Size,
        kind: OperandKind,
        value: Value,
        zero_extend: bool,
    ) -> Result<(), VmError> {
        let base = self.pc_next;
        match kind {
            OperandKind::Reg => {
                self.pc_next = self.pc_next.wrapping_add(1);
                let index = self.read8(base)?;
                let local = self.local(index)?;
                *local = match (value, zero_extend) {
                    (Value::Byte(b), false) => (*local & 0xFFFF_FF00) | b as u32,
                    (Value::Half(h), false) => (*local & 0xFFFF_0000) | h as u32,
                    (other, _) => other.inner(),
                };
                Ok(())
            }
            OperandKind::RegPtr => {
                self.pc_next = self.pc_next.wrapping_add(1);
                let index = self.read8(base)?;
                let address = *self.local(index)?;
                self.write_value(address, value)
            }
            OperandKind::Imm => Err(VmError::BadImmediate),
            OperandKind::ImmPtr => {
                self.pc_next = self.pc_next.wrapping_add(4);
                let address = self.read32(base)?;
                self.write_value(address, value)
            }
        }
    }

    pub fn skip_param(&mut self, size: Size, kind: OperandKind) {
        self.pc_next = self.pc_next.wrapping_add(kind.param_bytes(size));
    }

    // Whether the current condition field suppresses execution. An invalid
    // condition is an error in its own right.
    pub fn should_skip(&self, condition: u8) -> Result<bool, VmError> {
        match Condition::from_bits(condition) {
            Some(condition) => Ok(!condition.holds(self)),
            None => Err(VmError::BadCondition),
        }
    }

    // Execute a single instruction; does nothing while halted. Any fault
    // halts the CPU and leaves `pc` at the faulting instruction so recovery
    // can deliver an exception pointing at it.
    pub fn step(&mut self, bus: &mut Bus) -> Result<(), VmError> {
        if self.halted {
            return Ok(());
        }
        self.execute_next(bus).map_err(|err| {
            self.halted = true;
            err
        })
    }

    // Execute up to `budget` instructions, stopping early when halting or
    // faulting. Returns the number of completed instructions alongside the
    // verdict, so the outer loop can account for a partial budget.
    pub fn resume(&mut self, bus: &mut Bus, budget: u32) -> (u32, Result<(), VmError>) {
        let mut executed = 0;
        while !self.halted && executed < budget {
            if let Err(err) = self.execute_next(bus) {
                self.halted = true;
                return (executed, Err(err));
            }
            executed += 1;
        }
        (executed, Ok(()))
    }

    fn execute_next(&mut self, bus: &mut Bus) -> Result<(), VmError> {
        let base = self.pc;
        let header = self.read16(base)?;
        let instr = parse_instruction(header);
        self.pc_next = base.wrapping_add(2);
        if self.debug {
            let listing = disassemble(self, &instr, base)?;
            print!("{:08X} {}\r\n", base, listing);
        }
        instr.execute(self, bus)?;
        self.pc = self.pc_next;
        Ok(())
    }

    // Deliver an interrupt (vector < 256, gated on the interrupt flag) or an
    // exception. The handler address is the little-endian word at 4*vector
    // in RAM; the frame pushed on the target stack is, from the top: the
    // operand or vector word, the flags byte, the interrupted PC, and the
    // saved stack pointer when the swap flag was set.
    pub fn raise(&mut self, vector: u16) -> Result<(), VmError> {
        if !self.flag_interrupt && vector < 256 {
            return Err(VmError::NoInterrupts);
        }
        let handler = match self.mem.ram_read32(4 * vector as u32) {
            Some(address) => address,
            None => return Err(VmError::FaultRead),
        };

        if self.flag_swap_sp {
            let old_stack_pointer = self.sp;
            self.sp = self.esp;
            self.push(Value::Word(old_stack_pointer))?;
            self.push(Value::Word(self.pc))?;
            self.push(Value::Byte(self.flags_byte()))?;
            self.flag_swap_sp = false;
        } else {
            self.push(Value::Word(self.pc))?;
            self.push(Value::Byte(self.flags_byte()))?;
        }

        if vector >= 256 {
            let operand = self.exception_operand;
            self.push(Value::Word(operand))?;
            self.exception_operand = 0;
        } else {
            self.push(Value::Word(vector as u32))?;
        }

        self.pc = handler;
        self.halted = false;
        self.flag_interrupt = false;
        Ok(())
    }

    // Map an interpreter error back onto its architectural exception vector.
    pub fn recover(&mut self, err: VmError) -> Result<(), VmError> {
        match err {
            VmError::Debugger => self.raise(EXCEPTION_DEBUGGER),
            VmError::FaultRead => self.raise(EXCEPTION_FAULT_RD),
            VmError::FaultWrite => self.raise(EXCEPTION_FAULT_WR),
            VmError::BadOpcode
            | VmError::BadCondition
            | VmError::BadRegister
            | VmError::BadImmediate => self.raise(EXCEPTION_ILLEGAL),
            VmError::DivZero => self.raise(EXCEPTION_DIVZERO),
            VmError::IoRead | VmError::IoWrite => self.raise(EXCEPTION_BUS),
            _ => Err(VmError::CantRecover),
        }
    }
}
