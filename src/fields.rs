// Here reside the definitions of instruction fields; rather than have magic numbers
// everywhere, we opt for rich types wherever it is not too ridiculous.
// The parser is the code responsible for constructing said rich types, and the
// per-opcode semantics in the instructions module consume them.

use crate::conversions::{SignExtend, Truncate};
use crate::processor::{Cpu, VmError};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Size {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Size {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Byte),
            1 => Some(Self::Half),
            2 => Some(Self::Word),
            _ => None,
        }
    }
    pub fn bytes(&self) -> u32 {
        *self as u32
    }
    pub fn from<T>(&self, res: T) -> Value
    where
        T: Truncate<u8> + Truncate<u16> + Truncate<u32>,
    {
        match *self {
            Self::Byte => Value::Byte(res.truncate()),
            Self::Half => Value::Half(res.truncate()),
            Self::Word => Value::Word(res.truncate()),
        }
    }
    pub fn zero(&self) -> Value {
        self.from(0u32)
    }
    // Unsigned range of the size, as a u64 mask.
    fn mask(&self) -> u64 {
        match *self {
            Self::Byte => 0xFF,
            Self::Half => 0xFFFF,
            Self::Word => 0xFFFF_FFFF,
        }
    }
    fn signed_range(&self) -> (i64, i64) {
        match *self {
            Self::Byte => (i8::MIN as i64, i8::MAX as i64),
            Self::Half => (i16::MIN as i64, i16::MAX as i64),
            Self::Word => (i32::MIN as i64, i32::MAX as i64),
        }
    }
    pub fn as_asm(&self) -> &'static str {
        match *self {
            Self::Byte => "BYTE",
            Self::Half => "HALF",
            Self::Word => "WORD",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Value {
    Byte(u8),
    Half(u16),
    Word(u32),
}

// Flag updates produced by an operator kernel; `None` leaves the flag untouched.
#[derive(Debug, Default)]
pub struct Flags {
    pub zero: Option<bool>,
    pub carry: Option<bool>,
}

impl Flags {
    pub fn new() -> Flags {
        Flags::default()
    }
    pub fn set(&self, cpu: &mut Cpu) {
        if let Some(value) = self.zero {
            cpu.flag_zero = value;
        }
        if let Some(value) = self.carry {
            cpu.flag_carry = value;
        }
    }
}

impl Value {
    pub fn inner(&self) -> u32 {
        match *self {
            Self::Byte(b) => b as u32,
            Self::Half(h) => h as u32,
            Self::Word(w) => w,
        }
    }
    pub fn sign_extend(&self) -> i32 {
        match *self {
            Self::Byte(b) => b.sign_extend(),
            Self::Half(h) => h.sign_extend(),
            Self::Word(w) => w.sign_extend(),
        }
    }
    pub fn size(&self) -> Size {
        match self {
            Self::Byte(_) => Size::Byte,
            Self::Half(_) => Size::Half,
            Self::Word(_) => Size::Word,
        }
    }

    pub fn add(&self, other: Self) -> (Self, Flags) {
        let wide = self.inner() as u64 + other.inner() as u64;
        self.carrying(wide, wide > self.size().mask())
    }
    pub fn sub(&self, other: Self) -> (Self, Flags) {
        let wide = (self.inner() as u64).wrapping_sub(other.inner() as u64);
        self.carrying(wide, self.inner() < other.inner())
    }
    pub fn mul(&self, other: Self) -> (Self, Flags) {
        let wide = self.inner() as u64 * other.inner() as u64;
        self.carrying(wide, wide > self.size().mask())
    }
    pub fn mul_signed(&self, other: Self) -> (Self, Flags) {
        let wide = self.sign_extend() as i64 * other.sign_extend() as i64;
        let (min, max) = self.size().signed_range();
        self.carrying(wide as u64, wide < min || wide > max)
    }
    fn carrying(&self, wide: u64, carry: bool) -> (Self, Flags) {
        let result = self.size().from(wide as u32);
        let flags = Flags { zero: Some(result.inner() == 0), carry: Some(carry) };
        (result, flags)
    }

    pub fn div(&self, other: Self) -> Result<(Self, Flags), VmError> {
        self.quotient(other, |a, b| a / b)
    }
    pub fn rem(&self, other: Self) -> Result<(Self, Flags), VmError> {
        self.quotient(other, |a, b| a % b)
    }
    fn quotient<F>(&self, other: Self, fun: F) -> Result<(Self, Flags), VmError>
    where
        F: Fn(u32, u32) -> u32,
    {
        if other.inner() == 0 {
            return Err(VmError::DivZero);
        }
        Ok(self.zero_only(fun(self.inner(), other.inner())))
    }
    pub fn div_signed(&self, other: Self) -> Result<(Self, Flags), VmError> {
        if other.inner() == 0 {
            return Err(VmError::DivZero);
        }
        let res = self.sign_extend().wrapping_div(other.sign_extend());
        Ok(self.zero_only(res as u32))
    }
    pub fn rem_signed(&self, other: Self) -> Result<(Self, Flags), VmError> {
        if other.inner() == 0 {
            return Err(VmError::DivZero);
        }
        let res = self.sign_extend().wrapping_rem(other.sign_extend());
        Ok(self.zero_only(res as u32))
    }

    pub fn and(&self, other: Self) -> (Self, Flags) {
        self.zero_only(self.inner() & other.inner())
    }
    pub fn or(&self, other: Self) -> (Self, Flags) {
        self.zero_only(self.inner() | other.inner())
    }
    pub fn xor(&self, other: Self) -> (Self, Flags) {
        self.zero_only(self.inner() ^ other.inner())
    }
    pub fn not(&self) -> (Self, Flags) {
        self.zero_only(!self.inner())
    }

    // Shifting by the operand width or more drains every bit (sign-fills for
    // the arithmetic variant); rotates are modular in the operand width.
    pub fn shift_left(&self, count: Self) -> (Self, Flags) {
        let n = count.inner();
        self.zero_only(if n >= 32 { 0 } else { self.inner() << n })
    }
    pub fn shift_right(&self, count: Self) -> (Self, Flags) {
        let n = count.inner();
        self.zero_only(if n >= 32 { 0 } else { self.inner() >> n })
    }
    pub fn shift_right_signed(&self, count: Self) -> (Self, Flags) {
        let n = count.inner().min(31);
        self.zero_only((self.sign_extend() >> n) as u32)
    }
    pub fn rotate_left(&self, count: Self) -> (Self, Flags) {
        let n = count.inner();
        let rotated = match *self {
            Self::Byte(b) => b.rotate_left(n) as u32,
            Self::Half(h) => h.rotate_left(n) as u32,
            Self::Word(w) => w.rotate_left(n),
        };
        self.zero_only(rotated)
    }
    pub fn rotate_right(&self, count: Self) -> (Self, Flags) {
        let n = count.inner();
        let rotated = match *self {
            Self::Byte(b) => b.rotate_right(n) as u32,
            Self::Half(h) => h.rotate_right(n) as u32,
            Self::Word(w) => w.rotate_right(n),
        };
        self.zero_only(rotated)
    }

    pub fn bit_set(&self, bit: Self) -> (Self, Flags) {
        self.zero_only(self.inner() | Self::bit_mask(bit))
    }
    pub fn bit_clear(&self, bit: Self) -> (Self, Flags) {
        self.zero_only(self.inner() & !Self::bit_mask(bit))
    }
    pub fn bit_test(&self, bit: Self) -> Flags {
        let (_, flags) = self.zero_only(self.inner() & Self::bit_mask(bit));
        flags
    }
    fn bit_mask(bit: Self) -> u32 {
        1u32.checked_shl(bit.inner()).unwrap_or(0)
    }

    pub fn compare(&self, other: Self) -> Flags {
        let (_, flags) = self.sub(other);
        flags
    }

    pub fn increment(&self) -> (Self, Flags) {
        self.add(self.size().from(1u32))
    }
    pub fn decrement(&self) -> (Self, Flags) {
        self.sub(self.size().from(1u32))
    }

    fn zero_only(&self, res: u32) -> (Self, Flags) {
        let result = self.size().from(res);
        let flags = Flags { zero: Some(result.inner() == 0), carry: None };
        (result, flags)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Byte(b) => write!(f, "{:02X}", b),
            Value::Half(h) => write!(f, "{:04X}", h),
            Value::Word(w) => write!(f, "{:08X}", w),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Condition {
    Always = 0,
    IfZ = 1,
    IfNZ = 2,
    IfC = 3,
    IfNC = 4,
    IfGT = 5,
    IfLTEQ = 6,
}

impl Condition {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Always),
            1 => Some(Self::IfZ),
            2 => Some(Self::IfNZ),
            3 => Some(Self::IfC),
            4 => Some(Self::IfNC),
            5 => Some(Self::IfGT),
            6 => Some(Self::IfLTEQ),
            _ => None,
        }
    }
    pub fn holds(&self, cpu: &Cpu) -> bool {
        match *self {
            Self::Always => true,
            Self::IfZ => cpu.flag_zero,
            Self::IfNZ => !cpu.flag_zero,
            Self::IfC => cpu.flag_carry,
            Self::IfNC => !cpu.flag_carry,
            Self::IfGT => !cpu.flag_zero && !cpu.flag_carry,
            Self::IfLTEQ => cpu.flag_zero || cpu.flag_carry,
        }
    }
    pub fn as_asm(&self) -> &'static str {
        match *self {
            Self::Always => "      ",
            Self::IfZ => "IFZ   ",
            Self::IfNZ => "IFNZ  ",
            Self::IfC => "IFC   ",
            Self::IfNC => "IFNC  ",
            Self::IfGT => "IFGT  ",
            Self::IfLTEQ => "IFLTEQ",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandKind {
    Reg,
    RegPtr,
    Imm,
    ImmPtr,
}

impl OperandKind {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Reg,
            1 => Self::RegPtr,
            2 => Self::Imm,
            _ => Self::ImmPtr,
        }
    }
    // How many parameter bytes this operand occupies for an instruction of
    // the given size.
    pub fn param_bytes(&self, size: Size) -> u32 {
        match self {
            Self::Reg | Self::RegPtr => 1,
            Self::Imm => size.bytes(),
            Self::ImmPtr => 4,
        }
    }
}
