// Per-opcode semantics. Every instruction evaluates its condition first,
// consuming (or skipping) its parameter bytes either way so the stream stays
// in sync, then applies an operator kernel from the fields module. The
// dispatch is keyed on (operation, size); combinations with no entry raise
// the invalid-opcode error, which matches the encoding space exactly.

use crate::bus::Bus;
use crate::fields::{Size, Value};
use crate::parser::{Instr, Op};
use crate::processor::{Cpu, VmError, REGISTER_LOOP};

impl Instr {
    pub fn execute(&self, cpu: &mut Cpu, bus: &mut Bus) -> Result<(), VmError> {
        let op = match self.operation() {
            Some(op) => op,
            None => return Err(VmError::BadOpcode),
        };
        let size = match self.size() {
            Some(size) => size,
            None => return Err(VmError::BadOpcode),
        };
        let instr_base = cpu.pc;

        match (op, size) {
            (Op::Nop, _) => Ok(()),

            (Op::Halt, _) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                cpu.halted = true;
                Ok(())
            }
            (Op::Brk, _) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                Err(VmError::Debugger)
            }

            (Op::Ise, Size::Word) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                cpu.flag_interrupt = true;
                Ok(())
            }
            (Op::Icl, Size::Word) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                cpu.flag_interrupt = false;
                Ok(())
            }
            (Op::Mse, Size::Word) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                cpu.mmu.enabled = true;
                Ok(())
            }
            (Op::Mcl, Size::Word) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                cpu.mmu.enabled = false;
                Ok(())
            }
            (Op::Tlb, Size::Word) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let address = cpu.source(size, self.source)?.inner();
                cpu.mmu.set_and_flush(address);
                Ok(())
            }
            (Op::Flp, Size::Word) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let address = cpu.source(size, self.source)?.inner();
                cpu.mmu.flush_page(address);
                Ok(())
            }

            (Op::In, Size::Word) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let port = cpu.source(size, self.source)?.inner();
                let value = bus.io_read(&mut cpu.mem, port)?;
                cpu.target(size, self.target, Value::Word(value))
            }
            (Op::Out, Size::Word) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let value = cpu.source(size, self.source)?.inner();
                let port = cpu.source(size, self.target)?.inner();
                bus.io_write(&mut cpu.mem, port, value)
            }

            // The relative address take: target receives the address of this
            // instruction's header plus the source offset.
            (Op::Rta, Size::Word) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let offset = cpu.source(size, self.source)?.inner();
                cpu.target(size, self.target, Value::Word(instr_base.wrapping_add(offset)))
            }

            (Op::Ret, Size::Word) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                cpu.pc_next = cpu.pop(Size::Word)?.inner();
                Ok(())
            }
            (Op::Reti, Size::Word) => {
                if self.skip0(cpu)? {
                    return Ok(());
                }
                let flags = cpu.pop(Size::Byte)?.inner() as u8;
                cpu.set_flags_byte(flags);
                cpu.pc_next = cpu.pop(Size::Word)?.inner();
                Ok(())
            }

            (Op::Jmp, Size::Word) | (Op::Rjmp, Size::Word) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let destination = cpu.source(size, self.source)?.inner();
                cpu.pc_next = self.branch_target(op, instr_base, destination);
                Ok(())
            }
            // The return address is the instruction end, pushed after the
            // branch target parameter has been consumed.
            (Op::Call, Size::Word) | (Op::Rcall, Size::Word) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let destination = cpu.source(size, self.source)?.inner();
                cpu.push(Value::Word(cpu.pc_next))?;
                cpu.pc_next = self.branch_target(op, instr_base, destination);
                Ok(())
            }
            // The loop counter only decrements when the condition holds.
            (Op::Loop, Size::Word) | (Op::Rloop, Size::Word) => {
                if !cpu.should_skip(self.condition)? && {
                    cpu.regs[REGISTER_LOOP] = cpu.regs[REGISTER_LOOP].wrapping_sub(1);
                    cpu.regs[REGISTER_LOOP] != 0
                } {
                    let destination = cpu.source(size, self.source)?.inner();
                    cpu.pc_next = self.branch_target(op, instr_base, destination);
                } else {
                    cpu.skip_param(size, self.source);
                }
                Ok(())
            }

            (Op::Push, _) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let value = cpu.source(size, self.source)?;
                cpu.push(value)
            }
            (Op::Pop, _) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let value = cpu.pop(size)?;
                cpu.target(size, self.source, value)
            }

            (Op::Mov, _) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let value = cpu.source(size, self.source)?;
                cpu.target(size, self.target, value)
            }
            (Op::Movz, _) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let value = cpu.source(size, self.source)?;
                cpu.target_zero(size, self.target, value)
            }

            (Op::Inc, _) | (Op::Dec, _) | (Op::Not, _) => {
                if self.skip1(cpu, size)? {
                    return Ok(());
                }
                let value = cpu.source_stay(size, self.source)?;
                let (result, flags) = match op {
                    Op::Inc => value.increment(),
                    Op::Dec => value.decrement(),
                    _ => value.not(),
                };
                flags.set(cpu);
                cpu.target(size, self.source, result)
            }

            (Op::Add, _)
            | (Op::Sub, _)
            | (Op::Mul, _)
            | (Op::Imul, _)
            | (Op::And, _)
            | (Op::Or, _)
            | (Op::Xor, _)
            | (Op::Sla, _)
            | (Op::Srl, _)
            | (Op::Sra, _)
            | (Op::Rol, _)
            | (Op::Ror, _)
            | (Op::Bse, _)
            | (Op::Bcl, _) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let source = cpu.source(size, self.source)?;
                let target = cpu.source_stay(size, self.target)?;
                let (result, flags) = match op {
                    Op::Add => target.add(source),
                    Op::Sub => target.sub(source),
                    Op::Mul => target.mul(source),
                    Op::Imul => target.mul_signed(source),
                    Op::And => target.and(source),
                    Op::Or => target.or(source),
                    Op::Xor => target.xor(source),
                    Op::Sla => target.shift_left(source),
                    Op::Srl => target.shift_right(source),
                    Op::Sra => target.shift_right_signed(source),
                    Op::Rol => target.rotate_left(source),
                    Op::Ror => target.rotate_right(source),
                    Op::Bse => target.bit_set(source),
                    _ => target.bit_clear(source),
                };
                flags.set(cpu);
                cpu.target(size, self.target, result)
            }

            (Op::Div, _) | (Op::Rem, _) | (Op::Idiv, _) | (Op::Irem, _) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let source = cpu.source(size, self.source)?;
                let target = cpu.source_stay(size, self.target)?;
                let (result, flags) = match op {
                    Op::Div => target.div(source)?,
                    Op::Rem => target.rem(source)?,
                    Op::Idiv => target.div_signed(source)?,
                    _ => target.rem_signed(source)?,
                };
                flags.set(cpu);
                cpu.target(size, self.target, result)
            }

            (Op::Cmp, _) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let source = cpu.source(size, self.source)?;
                let target = cpu.source(size, self.target)?;
                target.compare(source).set(cpu);
                Ok(())
            }
            (Op::Bts, _) => {
                if self.skip2(cpu, size)? {
                    return Ok(());
                }
                let source = cpu.source(size, self.source)?;
                let target = cpu.source(size, self.target)?;
                target.bit_test(source).set(cpu);
                Ok(())
            }

            _ => Err(VmError::BadOpcode),
        }
    }

    fn branch_target(&self, op: Op, instr_base: u32, destination: u32) -> u32 {
        match op {
            Op::Rjmp | Op::Rcall | Op::Rloop => instr_base.wrapping_add(destination),
            _ => destination,
        }
    }

    fn skip0(&self, cpu: &mut Cpu) -> Result<bool, VmError> {
        cpu.should_skip(self.condition)
    }
    fn skip1(&self, cpu: &mut Cpu, size: Size) -> Result<bool, VmError> {
        if cpu.should_skip(self.condition)? {
            cpu.skip_param(size, self.source);
            return Ok(true);
        }
        Ok(false)
    }
    fn skip2(&self, cpu: &mut Cpu, size: Size) -> Result<bool, VmError> {
        if cpu.should_skip(self.condition)? {
            cpu.skip_param(size, self.target);
            cpu.skip_param(size, self.source);
            return Ok(true);
        }
        Ok(false)
    }
}
