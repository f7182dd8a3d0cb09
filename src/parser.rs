// This is where the dirty grunt work of making sense of our binary input
// happens. An instruction header is one halfword:
//
//   bits 0..1   source operand type
//   bits 2..3   target operand type
//   bits 4..6   condition
//   bit  7      unused
//   bits 8..15  opcode byte, whose top two bits carry the operand size
//
// Parameter bytes follow the header, source operand first.

use crate::fields::{Condition, OperandKind, Size};
use crate::processor::{Cpu, VmError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Op {
    Nop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    And = 0x03,
    Sla = 0x04,
    Sra = 0x05,
    Bse = 0x06,
    Cmp = 0x07,
    Jmp = 0x08,
    Rjmp = 0x09,
    Push = 0x0A,
    In = 0x0B,
    Ise = 0x0C,
    Mse = 0x0D,
    Halt = 0x10,
    Inc = 0x11,
    Or = 0x13,
    Imul = 0x14,
    Srl = 0x15,
    Bcl = 0x16,
    Mov = 0x17,
    Call = 0x18,
    Rcall = 0x19,
    Pop = 0x1A,
    Out = 0x1B,
    Icl = 0x1C,
    Mcl = 0x1D,
    Brk = 0x20,
    Sub = 0x21,
    Div = 0x22,
    Xor = 0x23,
    Rol = 0x24,
    Ror = 0x25,
    Bts = 0x26,
    Movz = 0x27,
    Loop = 0x28,
    Rloop = 0x29,
    Ret = 0x2A,
    Tlb = 0x2D,
    Dec = 0x31,
    Rem = 0x32,
    Not = 0x33,
    Idiv = 0x34,
    Irem = 0x35,
    Rta = 0x39,
    Reti = 0x3A,
    Flp = 0x3D,
}

impl Op {
    pub fn from_bits(bits: u8) -> Option<Op> {
        Some(match bits {
            0x00 => Op::Nop,
            0x01 => Op::Add,
            0x02 => Op::Mul,
            0x03 => Op::And,
            0x04 => Op::Sla,
            0x05 => Op::Sra,
            0x06 => Op::Bse,
            0x07 => Op::Cmp,
            0x08 => Op::Jmp,
            0x09 => Op::Rjmp,
            0x0A => Op::Push,
            0x0B => Op::In,
            0x0C => Op::Ise,
            0x0D => Op::Mse,
            0x10 => Op::Halt,
            0x11 => Op::Inc,
            0x13 => Op::Or,
            0x14 => Op::Imul,
            0x15 => Op::Srl,
            0x16 => Op::Bcl,
            0x17 => Op::Mov,
            0x18 => Op::Call,
            0x19 => Op::Rcall,
            0x1A => Op::Pop,
            0x1B => Op::Out,
            0x1C => Op::Icl,
            0x1D => Op::Mcl,
            0x20 => Op::Brk,
            0x21 => Op::Sub,
            0x22 => Op::Div,
            0x23 => Op::Xor,
            0x24 => Op::Rol,
            0x25 => Op::Ror,
            0x26 => Op::Bts,
            0x27 => Op::Movz,
            0x28 => Op::Loop,
            0x29 => Op::Rloop,
            0x2A => Op::Ret,
            0x2D => Op::Tlb,
            0x31 => Op::Dec,
            0x32 => Op::Rem,
            0x33 => Op::Not,
            0x34 => Op::Idiv,
            0x35 => Op::Irem,
            0x39 => Op::Rta,
            0x3A => Op::Reti,
            0x3D => Op::Flp,
            _ => return None,
        })
    }

    // Mnemonic and parameter count for the single-step trace.
    fn info(&self) -> (&'static str, usize) {
        match *self {
            Op::Nop => ("NOP  ", 0),
            Op::Add => ("ADD  ", 2),
            Op::Mul => ("MUL  ", 2),
            Op::And => ("AND  ", 2),
            Op::Sla => ("SLA  ", 2),
            Op::Sra => ("SRA  ", 2),
            Op::Bse => ("BSE  ", 2),
            Op::Cmp => ("CMP  ", 2),
            Op::Jmp => ("JMP  ", 1),
            Op::Rjmp => ("RJMP ", 1),
            Op::Push => ("PUSH ", 1),
            Op::In => ("IN   ", 2),
            Op::Ise => ("ISE  ", 0),
            Op::Mse => ("MSE  ", 0),
            Op::Halt => ("HALT ", 0),
            Op::Inc => ("INC  ", 1),
            Op::Or => ("OR   ", 2),
            Op::Imul => ("IMUL ", 2),
            Op::Srl => ("SRL  ", 2),
            Op::Bcl => ("BCL  ", 2),
            Op::Mov => ("MOV  ", 2),
            Op::Call => ("CALL ", 1),
            Op::Rcall => ("RCALL", 1),
            Op::Pop => ("POP  ", 1),
            Op::Out => ("OUT  ", 2),
            Op::Icl => ("ICL  ", 0),
            Op::Mcl => ("MCL  ", 0),
            Op::Brk => ("BRK  ", 0),
            Op::Sub => ("SUB  ", 2),
            Op::Div => ("DIV  ", 2),
            Op::Xor => ("XOR  ", 2),
            Op::Rol => ("ROL  ", 2),
            Op::Ror => ("ROR  ", 2),
            Op::Bts => ("BTS  ", 2),
            Op::Movz => ("MOVZ ", 2),
            Op::Loop => ("LOOP ", 1),
            Op::Rloop => ("RLOOP", 1),
            Op::Ret => ("RET  ", 0),
            Op::Tlb => ("TLB  ", 1),
            Op::Dec => ("DEC  ", 1),
            Op::Rem => ("REM  ", 2),
            Op::Not => ("NOT  ", 1),
            Op::Idiv => ("IDIV ", 2),
            Op::Irem => ("IREM ", 2),
            Op::Rta => ("RTA  ", 2),
            Op::Reti => ("RETI ", 0),
            Op::Flp => ("FLP  ", 1),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Instr {
    pub opcode: u8,    // raw opcode byte, size in the top two bits
    pub condition: u8, // raw condition bits, validated when evaluated
    pub target: OperandKind,
    pub source: OperandKind,
}

impl Instr {
    pub fn operation(&self) -> Option<Op> {
        Op::from_bits(self.opcode & 0x3F)
    }
    pub fn size(&self) -> Option<Size> {
        Size::from_bits(self.opcode >> 6)
    }
}

pub fn parse_instruction(header: u16) -> Instr {
    Instr {
        opcode: (header >> 8) as u8,
        condition: ((header >> 4) & 7) as u8,
        target: OperandKind::from_bits((header >> 2) as u8),
        source: OperandKind::from_bits(header as u8),
    }
}

const REGISTER_NAMES: [&str; 35] = [
    "R0 ", "R1 ", "R2 ", "R3 ", "R4 ", "R5 ", "R6 ", "R7 ", "R8 ", "R9 ", "R10", "R11", "R12",
    "R13", "R14", "R15", "R16", "R17", "R18", "R19", "R20", "R21", "R22", "R23", "R24", "R25",
    "R26", "R27", "R28", "R29", "R30", "R31", "RSP", "ESP", "RFP",
];

// Render one instruction for the single-step trace, reading its parameter
// bytes from memory without consuming them. Invalid encodings render as far
// as they can; execution raises the precise error afterwards.
pub fn disassemble(cpu: &mut Cpu, instr: &Instr, address: u32) -> Result<String, VmError> {
    let condition = Condition::from_bits(instr.condition)
        .map(|condition| condition.as_asm())
        .unwrap_or("??????");
    let (name, prcount) = match instr.operation() {
        Some(op) => op.info(),
        None => ("ERROR", 0),
    };
    let size = match instr.size() {
        Some(size) => size,
        None => return Ok(format!("{} ???? {}", condition, name)),
    };

    let mut text = format!("{} {} {}", condition, size.as_asm(), name);
    let mut offset = address.wrapping_add(2);
    for (slot, kind) in [instr.source, instr.target].iter().take(prcount).enumerate() {
        text.push_str(if slot == 0 { " " } else { ", " });
        match kind {
            OperandKind::Reg | OperandKind::RegPtr => {
                let index = cpu.read8(offset)? as usize;
                let local = REGISTER_NAMES.get(index).copied().unwrap_or("???");
                let prefix = if *kind == OperandKind::Reg { "REG   " } else { "REGPTR" };
                text.push_str(&format!("{} {}", prefix, local));
            }
            OperandKind::Imm => {
                let value = cpu.read_value(offset, size)?;
                text.push_str(&format!("IMM    {:08X}", value.inner()));
            }
            OperandKind::ImmPtr => {
                let value = cpu.read32(offset)?;
                text.push_str(&format!("IMMPTR {:08X}", value));
            }
        }
        offset = offset.wrapping_add(kind.param_bytes(size));
    }
    Ok(text)
}
