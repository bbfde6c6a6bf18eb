//! Instruction dispatch and per-opcode executors.
//!
//! [`execute`] decodes one word and runs it against the process state,
//! returning the next instruction pointer; `None` signals a halt. Decode
//! order follows the word layout: the opcode field is masked out first,
//! its format tag second, and the format arm decodes the operand lanes
//! before selecting the executor.
//!
//! Typed arithmetic takes its result tag from the opcode's signedness
//! (ADDI vs ADDIU) or, for the T format, from the left-hand operand; the
//! untagged bit patterns of the operands are what the ALU sees.

use crate::arch::{self, opcode_of, Format, Opcode, RegisterAccess, WORD_SIZE};
use crate::elf::{st_type, STT_FUNC};
use crate::errors::Trap;
use crate::vm::process::{AccessError, Frame, Process};
use crate::vm::value::{BoxedObject, Value};

/// Executes the word at `ip`, returning the next instruction pointer.
pub fn execute(proc: &mut Process, ip: usize) -> Result<Option<usize>, Trap> {
    let Some(&raw) = proc.image.text.get(ip) else {
        return Err(Trap::IpOutOfRange {
            ip,
            opcode: 0,
            target: ip,
        });
    };

    let opcode = opcode_of(raw);
    let op =
        Opcode::try_from(opcode).map_err(|_| Trap::InvalidInstruction { ip, raw })?;

    match op.format() {
        Format::N => match op {
            Opcode::Noop => Ok(Some(ip + 1)),
            Opcode::Halt => Ok(None),
            Opcode::Ebreak => {
                ebreak_dump(proc);
                Ok(Some(ip + 1))
            }
            Opcode::Return => execute_return(proc, ip, opcode),
            _ => Err(Trap::InvalidInstruction { ip, raw }),
        },
        Format::S => {
            let ins = arch::S::decode(raw).map_err(|_| Trap::InvalidInstruction { ip, raw })?;
            match op {
                Opcode::Delete => {
                    proc.write(ins.out, Value::Void)
                        .map_err(|e| access_trap(e, ip, opcode))?;
                    Ok(Some(ip + 1))
                }
                Opcode::String => execute_string(proc, ins.out, ip, opcode),
                Opcode::Frame => {
                    // The access index carries the argument count.
                    proc.arguments = vec![Value::Void; ins.out.index as usize];
                    Ok(Some(ip + 1))
                }
                _ => Err(Trap::InvalidInstruction { ip, raw }),
            }
        }
        Format::D => {
            let ins = arch::D::decode(raw).map_err(|_| Trap::InvalidInstruction { ip, raw })?;
            match op {
                Opcode::Call => execute_call(proc, ins.out, ins.input, ip, opcode),
                Opcode::Atom => execute_atom(proc, ins.out, ins.input, ip, opcode),
                Opcode::Bitnot => {
                    let input = fetch(proc, ins.input, ip, opcode)?;
                    let bits = numeric_bits(&input, ip, opcode)?;
                    let result = if input.is_void() {
                        Value::Unsigned(!bits)
                    } else {
                        input.with_bits(!bits)
                    };
                    save(proc, ins.out, result, ip, opcode)?;
                    Ok(Some(ip + 1))
                }
                Opcode::Not => {
                    let input = fetch(proc, ins.input, ip, opcode)?;
                    let truthy = is_truthy(&input);
                    save(proc, ins.out, Value::Unsigned(u64::from(!truthy)), ip, opcode)?;
                    Ok(Some(ip + 1))
                }
                Opcode::Copy => {
                    let value = read_direct(proc, ins.input, ip, opcode)?;
                    write_direct(proc, ins.out, value, ip, opcode)?;
                    Ok(Some(ip + 1))
                }
                Opcode::Move => {
                    let value = take_direct(proc, ins.input, ip, opcode)?;
                    write_direct(proc, ins.out, value, ip, opcode)?;
                    Ok(Some(ip + 1))
                }
                _ => Err(Trap::InvalidInstruction { ip, raw }),
            }
        }
        Format::T => {
            let ins = arch::T::decode(raw).map_err(|_| Trap::InvalidInstruction { ip, raw })?;
            let result = execute_binary(proc, op, &ins, ip, opcode)?;
            save(proc, ins.out, result, ip, opcode)?;
            Ok(Some(ip + 1))
        }
        Format::F => {
            let ins = arch::F::decode(raw).map_err(|_| Trap::InvalidInstruction { ip, raw })?;
            let result = match op {
                Opcode::Lih => Value::Unsigned((ins.immediate as u64) << 32),
                Opcode::Lil => {
                    let prev = fetch(proc, ins.out, ip, opcode)?;
                    let bits = numeric_bits(&prev, ip, opcode)?;
                    Value::Unsigned((bits & 0xffff_ffff_0000_0000) | ins.immediate as u64)
                }
                Opcode::Float => Value::FloatSingle(f32::from_bits(ins.immediate)),
                _ => return Err(Trap::InvalidInstruction { ip, raw }),
            };
            save(proc, ins.out, result, ip, opcode)?;
            Ok(Some(ip + 1))
        }
        Format::E => {
            let ins = arch::E::decode(raw).map_err(|_| Trap::InvalidInstruction { ip, raw })?;
            let shifted = ins.immediate << 28;
            let result = match op {
                Opcode::Lui => Value::Signed(shifted as i64),
                Opcode::Luiu => Value::Unsigned(shifted),
                _ => return Err(Trap::InvalidInstruction { ip, raw }),
            };
            save(proc, ins.out, result, ip, opcode)?;
            Ok(Some(ip + 1))
        }
        Format::R => {
            let ins = arch::R::decode(raw).map_err(|_| Trap::InvalidInstruction { ip, raw })?;
            if op == Opcode::Aa {
                return execute_aa(proc, &ins, ip, opcode);
            }

            let base_value = fetch(proc, ins.input, ip, opcode)?;
            let base = numeric_bits(&base_value, ip, opcode)?;
            let imm = ins.immediate as u64;
            let result = match op {
                Opcode::Addi => Value::Signed((base as i64).wrapping_add(imm as i64)),
                Opcode::Addiu => Value::Unsigned(base.wrapping_add(imm)),
                Opcode::Subi => Value::Signed((base as i64).wrapping_sub(imm as i64)),
                Opcode::Subiu => Value::Unsigned(base.wrapping_sub(imm)),
                Opcode::Muli => Value::Signed((base as i64).wrapping_mul(imm as i64)),
                Opcode::Muliu => Value::Unsigned(base.wrapping_mul(imm)),
                Opcode::Divi => {
                    if imm == 0 {
                        return Err(Trap::DivisionByZero { ip, opcode });
                    }
                    Value::Signed((base as i64).wrapping_div(imm as i64))
                }
                Opcode::Diviu => {
                    if imm == 0 {
                        return Err(Trap::DivisionByZero { ip, opcode });
                    }
                    Value::Unsigned(base / imm)
                }
                _ => return Err(Trap::InvalidInstruction { ip, raw }),
            };
            save(proc, ins.out, result, ip, opcode)?;
            Ok(Some(ip + 1))
        }
    }
}

fn access_trap(err: AccessError, ip: usize, opcode: u16) -> Trap {
    match err {
        AccessError::OutOfRange { index } => Trap::RegisterOutOfRange { ip, opcode, index },
        AccessError::NoFrame => Trap::NoActiveFrame { ip, opcode },
    }
}

fn invalid_operand(value: &Value, expected: &'static str, ip: usize, opcode: u16) -> Trap {
    Trap::InvalidOperandType {
        ip,
        opcode,
        expected,
        actual: value.type_name(),
    }
}

/// The unboxed bit pattern of a value, or an invalid-operand trap.
fn numeric_bits(value: &Value, ip: usize, opcode: u16) -> Result<u64, Trap> {
    value
        .bits()
        .ok_or_else(|| invalid_operand(value, "an unboxed value", ip, opcode))
}

fn is_truthy(value: &Value) -> bool {
    match value.bits() {
        Some(bits) => bits != 0,
        None => true,
    }
}

/// Reads through an access, following the indirection bit.
///
/// An indirect access dereferences the pointer held in the register: the
/// address must be live in the pointer registry, and the load reads a
/// little-endian u64 from the process heap.
fn fetch(proc: &Process, access: RegisterAccess, ip: usize, opcode: u16) -> Result<Value, Trap> {
    let held = proc
        .read(access)
        .map_err(|e| access_trap(e, ip, opcode))?;
    if access.direct {
        return Ok(held);
    }

    let address = numeric_bits(&held, ip, opcode)?;
    let bytes = deref(proc, address, ip, opcode)?;
    Ok(Value::Unsigned(u64::from_le_bytes(bytes)))
}

/// Writes through an access, following the indirection bit.
fn save(
    proc: &mut Process,
    access: RegisterAccess,
    value: Value,
    ip: usize,
    opcode: u16,
) -> Result<(), Trap> {
    if access.direct {
        return proc
            .write(access, value)
            .map_err(|e| access_trap(e, ip, opcode));
    }

    let held = proc
        .read(access)
        .map_err(|e| access_trap(e, ip, opcode))?;
    let address = numeric_bits(&held, ip, opcode)?;
    let bits = numeric_bits(&value, ip, opcode)?;

    check_pointer(proc, address, ip, opcode)?;
    let start = address as usize;
    let slot = proc
        .heap
        .get_mut(start..start + WORD_SIZE)
        .ok_or(Trap::InvalidPointer {
            ip,
            opcode,
            address,
        })?;
    slot.copy_from_slice(&bits.to_le_bytes());
    Ok(())
}

fn check_pointer(proc: &Process, address: u64, ip: usize, opcode: u16) -> Result<(), Trap> {
    if !proc.pointer_is_live(address) {
        return Err(Trap::InvalidPointer {
            ip,
            opcode,
            address,
        });
    }
    Ok(())
}

fn deref(proc: &Process, address: u64, ip: usize, opcode: u16) -> Result<[u8; 8], Trap> {
    check_pointer(proc, address, ip, opcode)?;
    let start = address as usize;
    proc.heap
        .get(start..start + WORD_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Trap::InvalidPointer {
            ip,
            opcode,
            address,
        })
}

/// Direct-register read for value-moving instructions (COPY).
fn read_direct(
    proc: &Process,
    access: RegisterAccess,
    ip: usize,
    opcode: u16,
) -> Result<Value, Trap> {
    if !access.direct {
        return Err(Trap::InvalidOperandType {
            ip,
            opcode,
            expected: "a direct register access",
            actual: "a pointer dereference",
        });
    }
    proc.read(access).map_err(|e| access_trap(e, ip, opcode))
}

fn take_direct(
    proc: &mut Process,
    access: RegisterAccess,
    ip: usize,
    opcode: u16,
) -> Result<Value, Trap> {
    if !access.direct {
        return Err(Trap::InvalidOperandType {
            ip,
            opcode,
            expected: "a direct register access",
            actual: "a pointer dereference",
        });
    }
    proc.take(access).map_err(|e| access_trap(e, ip, opcode))
}

fn write_direct(
    proc: &mut Process,
    access: RegisterAccess,
    value: Value,
    ip: usize,
    opcode: u16,
) -> Result<(), Trap> {
    if !access.direct {
        return Err(Trap::InvalidOperandType {
            ip,
            opcode,
            expected: "a direct register access",
            actual: "a pointer dereference",
        });
    }
    proc.write(access, value)
        .map_err(|e| access_trap(e, ip, opcode))
}

/// T-format binary operations.
fn execute_binary(
    proc: &Process,
    op: Opcode,
    ins: &arch::T,
    ip: usize,
    opcode: u16,
) -> Result<Value, Trap> {
    let lhs = fetch(proc, ins.lhs, ip, opcode)?;
    let rhs = fetch(proc, ins.rhs, ip, opcode)?;

    // Boxed operands only make sense for equality, and only when both
    // sides are boxed the same way.
    if op == Opcode::Eq {
        if let (Value::Boxed(a), Value::Boxed(b)) = (&lhs, &rhs) {
            let equal = match (a, b) {
                (BoxedObject::Atom(x), BoxedObject::Atom(y)) => x == y,
                (BoxedObject::Str(x), BoxedObject::Str(y)) => x == y,
                _ => {
                    return Err(invalid_operand(&rhs, "a matching boxed type", ip, opcode));
                }
            };
            return Ok(Value::Unsigned(u64::from(equal)));
        }
    }

    // The result tag follows the left-hand operand; a void lhs defers to
    // the rhs so `add %out, void, %x` keeps x's signedness.
    let signed = if lhs.is_void() {
        rhs.is_signed()
    } else {
        lhs.is_signed()
    };
    let l = numeric_bits(&lhs, ip, opcode)?;
    let r = numeric_bits(&rhs, ip, opcode)?;

    let tag_int = |bits: u64| {
        if signed {
            Value::Signed(bits as i64)
        } else {
            Value::Unsigned(bits)
        }
    };

    Ok(match op {
        Opcode::Add => tag_int(l.wrapping_add(r)),
        Opcode::Sub => tag_int(l.wrapping_sub(r)),
        Opcode::Mul => tag_int(l.wrapping_mul(r)),
        Opcode::Div => {
            if r == 0 {
                return Err(Trap::DivisionByZero { ip, opcode });
            }
            if signed {
                Value::Signed((l as i64).wrapping_div(r as i64))
            } else {
                Value::Unsigned(l / r)
            }
        }
        Opcode::Mod => {
            if r == 0 {
                return Err(Trap::DivisionByZero { ip, opcode });
            }
            if signed {
                Value::Signed((l as i64).wrapping_rem(r as i64))
            } else {
                Value::Unsigned(l % r)
            }
        }
        Opcode::Bitshl => tag_int(l.wrapping_shl(r as u32)),
        Opcode::Bitshr => tag_int(l.wrapping_shr(r as u32)),
        Opcode::Bitashr => tag_int(((l as i64).wrapping_shr(r as u32)) as u64),
        Opcode::Bitrol => tag_int(l.rotate_left(r as u32)),
        Opcode::Bitror => tag_int(l.rotate_right(r as u32)),
        Opcode::Bitand => tag_int(l & r),
        Opcode::Bitor => tag_int(l | r),
        Opcode::Bitxor => tag_int(l ^ r),
        Opcode::Eq => Value::Unsigned(u64::from(l == r)),
        Opcode::Lt => Value::Unsigned(u64::from(if signed {
            (l as i64) < (r as i64)
        } else {
            l < r
        })),
        Opcode::Gt => Value::Unsigned(u64::from(if signed {
            (l as i64) > (r as i64)
        } else {
            l > r
        })),
        Opcode::Cmp => {
            let ordering = if signed {
                (l as i64).cmp(&(r as i64))
            } else {
                l.cmp(&r)
            };
            Value::Signed(ordering as i64)
        }
        Opcode::And => Value::Unsigned(u64::from(l != 0 && r != 0)),
        Opcode::Or => Value::Unsigned(u64::from(l != 0 || r != 0)),
        _ => {
            return Err(Trap::InvalidInstruction {
                ip,
                raw: opcode as u64,
            });
        }
    })
}

/// CALL: the input register holds a symbol index; control transfers to
/// that function with a fresh frame. Arguments staged by FRAME become the
/// callee's parameters.
fn execute_call(
    proc: &mut Process,
    out: RegisterAccess,
    input: RegisterAccess,
    ip: usize,
    opcode: u16,
) -> Result<Option<usize>, Trap> {
    let held = fetch(proc, input, ip, opcode)?;
    let index = numeric_bits(&held, ip, opcode)? as usize;

    let symbol = proc
        .image
        .symbols
        .get(index)
        .ok_or(Trap::InvalidSymbol { ip, opcode, index })?;
    if st_type(symbol.st_info) != STT_FUNC || symbol.st_value == 0 {
        return Err(Trap::InvalidSymbol { ip, opcode, index });
    }

    let byte_offset = symbol.st_value;
    let target = (byte_offset / WORD_SIZE as u64) as usize;
    if byte_offset % WORD_SIZE as u64 != 0 || target >= proc.image.text.len() {
        return Err(Trap::IpOutOfRange { ip, opcode, target });
    }

    let parameters = std::mem::take(&mut proc.arguments);
    proc.frames.push(Frame::new(parameters, ip + 1, out));
    Ok(Some(target))
}

/// RETURN: pops the frame, moving the callee's local 0 into the register
/// the CALL named. Returning with no caller left halts the process.
fn execute_return(proc: &mut Process, ip: usize, opcode: u16) -> Result<Option<usize>, Trap> {
    let Some(mut frame) = proc.frames.pop() else {
        return Ok(None);
    };
    if proc.frames.is_empty() {
        return Ok(None);
    }

    let value = std::mem::take(&mut frame.locals[0]);
    proc.write(frame.return_register, value)
        .map_err(|e| access_trap(e, ip, opcode))?;
    Ok(Some(frame.return_ip))
}

/// STRING: the register holds a constant-pool data offset; the entry's
/// length prefix sits eight bytes before it. The register is replaced
/// with the boxed string.
fn execute_string(
    proc: &mut Process,
    out: RegisterAccess,
    ip: usize,
    opcode: u16,
) -> Result<Option<usize>, Trap> {
    let held = fetch(proc, out, ip, opcode)?;
    let offset = numeric_bits(&held, ip, opcode)?;

    let bad = Trap::ConstantOutOfRange { ip, opcode, offset };
    let start = offset as usize;
    if start < WORD_SIZE || start > proc.image.rodata.len() {
        return Err(bad);
    }
    let prefix: [u8; 8] = proc.image.rodata[start - WORD_SIZE..start]
        .try_into()
        .unwrap_or_default();
    let length = u64::from_le_bytes(prefix) as usize;
    let bytes = proc
        .image
        .rodata
        .get(start..start + length)
        .ok_or(bad)?;

    let string = std::str::from_utf8(bytes)
        .map_err(|_| Trap::InvalidUtf8 {
            ip,
            opcode,
            offset: start,
        })?
        .to_string();
    save(proc, out, Value::Boxed(BoxedObject::Str(string)), ip, opcode)?;
    Ok(Some(ip + 1))
}

/// ATOM: the input register holds a symbol index of an STT_OBJECT; the
/// atom's name is read from `.rodata` at the symbol's value.
fn execute_atom(
    proc: &mut Process,
    out: RegisterAccess,
    input: RegisterAccess,
    ip: usize,
    opcode: u16,
) -> Result<Option<usize>, Trap> {
    let held = fetch(proc, input, ip, opcode)?;
    let index = numeric_bits(&held, ip, opcode)? as usize;

    let symbol = proc
        .image
        .symbols
        .get(index)
        .ok_or(Trap::InvalidSymbol { ip, opcode, index })?;
    let start = symbol.st_value as usize;
    let end = start + symbol.st_size as usize;
    let bytes = proc
        .image
        .rodata
        .get(start..end)
        .ok_or(Trap::ConstantOutOfRange {
            ip,
            opcode,
            offset: symbol.st_value,
        })?;

    let name = std::str::from_utf8(bytes)
        .map_err(|_| Trap::InvalidUtf8 {
            ip,
            opcode,
            offset: start,
        })?
        .to_string();
    save(proc, out, Value::Boxed(BoxedObject::Atom(name)), ip, opcode)?;
    Ok(Some(ip + 1))
}

/// AA: allocates `size` bytes (from the input register) aligned to
/// `1 << immediate`. The heap break is rounded up to the alignment, the
/// pointer is recorded in the registry, and the aligned address lands in
/// the output register.
fn execute_aa(
    proc: &mut Process,
    ins: &arch::R,
    ip: usize,
    opcode: u16,
) -> Result<Option<usize>, Trap> {
    let held = fetch(proc, ins.input, ip, opcode)?;
    let size = numeric_bits(&held, ip, opcode)?;

    let alignment = 1u64
        .checked_shl(ins.immediate)
        .ok_or(Trap::InvalidOperandType {
            ip,
            opcode,
            expected: "an alignment exponent below 64",
            actual: "a wider exponent",
        })?;

    let brk = proc.heap_break();
    let aligned = brk
        .checked_add(alignment - 1)
        .map(|v| v / alignment * alignment)
        .ok_or(Trap::InvalidOperandType {
            ip,
            opcode,
            expected: "an allocation within the address space",
            actual: "an overflowing allocation",
        })?;
    let new_break = aligned
        .checked_add(size)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or(Trap::InvalidOperandType {
            ip,
            opcode,
            expected: "an allocation within the address space",
            actual: "an overflowing allocation",
        })?;

    proc.heap.resize(new_break, 0);
    proc.pointers.push(crate::vm::process::Pointer {
        address: aligned,
        size,
    });
    save(proc, ins.out, Value::Unsigned(aligned), ip, opcode)?;
    Ok(Some(ip + 1))
}

/// EBREAK: dumps every non-void register of the local, argument, and
/// parameter sets to stderr.
fn ebreak_dump(proc: &Process) {
    eprintln!("ebreak");
    if let Some(frame) = proc.frames.last() {
        dump_register_set('l', &frame.locals);
        dump_register_set('a', &proc.arguments);
        dump_register_set('p', &frame.parameters);
    }
}

fn dump_register_set(set: char, values: &[Value]) {
    for (index, value) in values.iter().enumerate() {
        match value {
            Value::Void => {}
            Value::Byte(b) => eprintln!("[{index}.{set}] by {b:02x} {b}"),
            Value::Signed(v) => eprintln!("[{index}.{set}] is {:016x} {v}", *v as u64),
            Value::Unsigned(v) => eprintln!("[{index}.{set}] iu {v:016x} {v}"),
            Value::FloatSingle(v) => eprintln!("[{index}.{set}] fl {:08x} {v}", v.to_bits()),
            Value::FloatDouble(v) => eprintln!("[{index}.{set}] db {:016x} {v}", v.to_bits()),
            Value::Boxed(BoxedObject::Str(s)) => {
                eprintln!("[{index}.{set}] string = {s:?}")
            }
            Value::Boxed(BoxedObject::Atom(a)) => eprintln!("[{index}.{set}] atom = {a}"),
        }
    }
}
