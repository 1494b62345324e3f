use byteorder::{BigEndian, WriteBytesExt};

use super::ClassFileError;

// JVM opcodes used by the code generator. Only the subset the language needs.
const OP_BIPUSH: u8 = 0x10;
const OP_LDC: u8 = 0x12;
const OP_LDC_W: u8 = 0x13;
const OP_LDC2_W: u8 = 0x14;
const OP_ILOAD: u8 = 0x15;
const OP_DLOAD: u8 = 0x18;
const OP_ALOAD: u8 = 0x19;
const OP_ILOAD_0: u8 = 0x1a;
const OP_DLOAD_0: u8 = 0x26;
const OP_ALOAD_0: u8 = 0x2a;
const OP_ISTORE: u8 = 0x36;
const OP_DSTORE: u8 = 0x39;
const OP_ASTORE: u8 = 0x3a;
const OP_ISTORE_0: u8 = 0x3b;
const OP_DSTORE_0: u8 = 0x47;
const OP_ASTORE_0: u8 = 0x4b;
const OP_IADD: u8 = 0x60;
const OP_DADD: u8 = 0x63;
const OP_ISUB: u8 = 0x64;
const OP_DSUB: u8 = 0x67;
const OP_IMUL: u8 = 0x68;
const OP_DMUL: u8 = 0x6b;
const OP_IDIV: u8 = 0x6c;
const OP_DDIV: u8 = 0x6f;
const OP_INEG: u8 = 0x74;
const OP_DNEG: u8 = 0x77;
const OP_DCMPG: u8 = 0x98;
const OP_IF_ICMPEQ: u8 = 0x9f;
const OP_IF_ACMPEQ: u8 = 0xa5;
const OP_IF_ACMPNE: u8 = 0xa6;
const OP_GOTO: u8 = 0xa7;
const OP_RETURN: u8 = 0xb1;
const OP_GETSTATIC: u8 = 0xb2;
const OP_INVOKEVIRTUAL: u8 = 0xb6;
const OP_INVOKESPECIAL: u8 = 0xb7;
const OP_WIDE: u8 = 0xc4;

/// Opaque handle to a position in one method's instruction stream.
///
/// Created with [`CodeBuilder::new_label`] before use; bound to a concrete
/// instruction index at most once. Branches may reference a label before it
/// is bound (forward references resolve at assembly time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub(crate) usize);

/// Condition for the `if_icmp<cond>` family of two-operand integer branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCondition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl JumpCondition {
    fn opcode(self) -> u8 {
        // if_icmpeq .. if_icmple are consecutive opcodes
        let offset = match self {
            JumpCondition::Eq => 0,
            JumpCondition::Ne => 1,
            JumpCondition::Lt => 2,
            JumpCondition::Ge => 3,
            JumpCondition::Gt => 4,
            JumpCondition::Le => 5,
        };
        OP_IF_ICMPEQ + offset
    }
}

/// One instruction of the entry-point method, with branch targets still
/// expressed as [`Label`]s. Concrete byte offsets are computed by
/// [`CodeBuilder::assemble`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    /// Push a single-slot constant (Integer or String pool entry).
    /// Serialized as `ldc` or `ldc_w` depending on the pool index.
    Ldc(u16),
    /// Push a Double pool entry (`ldc2_w`).
    Ldc2W(u16),
    /// Push a signed byte as an int.
    Bipush(i8),
    Iload(u16),
    Dload(u16),
    Aload(u16),
    Istore(u16),
    Dstore(u16),
    Astore(u16),
    Iadd,
    Isub,
    Imul,
    Idiv,
    Ineg,
    Dadd,
    Dsub,
    Dmul,
    Ddiv,
    Dneg,
    /// Three-way double comparison pushing -1/0/1 (NaN orders as 1).
    Dcmpg,
    IfIcmp(JumpCondition, Label),
    IfAcmpEq(Label),
    IfAcmpNe(Label),
    Goto(Label),
    Getstatic(u16),
    /// `arg_slots` is the number of operand-stack slots consumed by the
    /// arguments (receiver excluded); needed for stack-depth computation
    /// because the pool index alone does not carry the descriptor.
    Invokevirtual { index: u16, arg_slots: u16 },
    /// `()V` constructor invocation; pops the receiver only.
    Invokespecial(u16),
    Return,
}

impl Instruction {
    /// Net operand-stack effect, in slots.
    fn stack_delta(self) -> i32 {
        match self {
            Instruction::Ldc(_)
            | Instruction::Bipush(_)
            | Instruction::Iload(_)
            | Instruction::Aload(_)
            | Instruction::Getstatic(_) => 1,
            Instruction::Ldc2W(_) | Instruction::Dload(_) => 2,
            Instruction::Istore(_) | Instruction::Astore(_) => -1,
            Instruction::Dstore(_) => -2,
            Instruction::Iadd
            | Instruction::Isub
            | Instruction::Imul
            | Instruction::Idiv => -1,
            Instruction::Dadd
            | Instruction::Dsub
            | Instruction::Dmul
            | Instruction::Ddiv => -2,
            Instruction::Ineg | Instruction::Dneg => 0,
            // pops two doubles, pushes an int
            Instruction::Dcmpg => -3,
            Instruction::IfIcmp(_, _)
            | Instruction::IfAcmpEq(_)
            | Instruction::IfAcmpNe(_) => -2,
            Instruction::Goto(_) | Instruction::Return => 0,
            Instruction::Invokevirtual { arg_slots, .. } => -(1 + arg_slots as i32),
            Instruction::Invokespecial(_) => -1,
        }
    }

    /// Encoded size in bytes.
    fn byte_size(self) -> u32 {
        match self {
            Instruction::Ldc(index) => {
                if index <= u8::MAX as u16 {
                    2
                } else {
                    3
                }
            }
            Instruction::Ldc2W(_) => 3,
            Instruction::Bipush(_) => 2,
            Instruction::Iload(slot)
            | Instruction::Dload(slot)
            | Instruction::Aload(slot)
            | Instruction::Istore(slot)
            | Instruction::Dstore(slot)
            | Instruction::Astore(slot) => var_insn_size(slot),
            Instruction::IfIcmp(_, _)
            | Instruction::IfAcmpEq(_)
            | Instruction::IfAcmpNe(_)
            | Instruction::Goto(_)
            | Instruction::Getstatic(_)
            | Instruction::Invokevirtual { .. }
            | Instruction::Invokespecial(_) => 3,
            _ => 1,
        }
    }

    fn branch_target(self) -> Option<Label> {
        match self {
            Instruction::IfIcmp(_, label)
            | Instruction::IfAcmpEq(label)
            | Instruction::IfAcmpNe(label)
            | Instruction::Goto(label) => Some(label),
            _ => None,
        }
    }
}

fn var_insn_size(slot: u16) -> u32 {
    if slot <= 3 {
        1 // iload_0 .. iload_3 compact forms
    } else if slot <= u8::MAX as u16 {
        2
    } else {
        4 // wide prefix
    }
}

/// Result of assembling one method body.
pub(crate) struct AssembledCode {
    pub(crate) bytecode: Vec<u8>,
    pub(crate) max_stack: u16,
}

/// Append-only instruction stream for a single method body.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<Instruction>,
    // Label -> instruction index, None while unbound
    labels: Vec<Option<usize>>,
    // first label bound twice, if any; reported at assembly
    rebound: Option<Label>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the position of the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0];
        if slot.is_some() && self.rebound.is_none() {
            self.rebound = Some(label);
        }
        *slot = Some(self.instructions.len());
    }

    /// Append one instruction to the stream.
    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Resolve labels, compute the operand-stack high-water mark by data-flow
    /// over the instruction list, and serialize to bytecode with branch
    /// offsets patched.
    pub(crate) fn assemble(&self) -> Result<AssembledCode, ClassFileError> {
        if let Some(label) = self.rebound {
            return Err(ClassFileError::LabelRebound(label.0));
        }
        let mut targets = Vec::with_capacity(self.labels.len());
        for (index, bound) in self.labels.iter().enumerate() {
            match bound {
                Some(target) if *target < self.instructions.len() => targets.push(*target),
                Some(_) => return Err(ClassFileError::MissingReturn),
                None => return Err(ClassFileError::UnboundLabel(index)),
            }
        }

        let max_stack = self.compute_max_stack(&targets)?;

        // first pass: byte address of every instruction
        let mut addresses = Vec::with_capacity(self.instructions.len());
        let mut address = 0u32;
        for instruction in &self.instructions {
            addresses.push(address);
            address += instruction.byte_size();
        }

        // second pass: encode, patching branch offsets relative to the
        // branch instruction's own address
        let mut bytecode = Vec::with_capacity(address as usize);
        for (index, instruction) in self.instructions.iter().enumerate() {
            let branch_offset = match instruction.branch_target() {
                Some(label) => {
                    let target_address = addresses[targets[label.0]] as i64;
                    let offset = target_address - addresses[index] as i64;
                    Some(i16::try_from(offset).map_err(|_| {
                        ClassFileError::BranchOffsetOverflow {
                            from: addresses[index],
                            to: target_address as u32,
                        }
                    })?)
                }
                None => None,
            };
            encode(*instruction, branch_offset, &mut bytecode)?;
        }

        Ok(AssembledCode {
            bytecode,
            max_stack,
        })
    }

    // Worklist walk from the entry point; every instruction must be reached
    // with a single consistent stack depth (true for the structured code the
    // generator emits). Branch and fall-through edges are both followed.
    fn compute_max_stack(&self, targets: &[usize]) -> Result<u16, ClassFileError> {
        let mut depth_at: Vec<Option<i32>> = vec![None; self.instructions.len()];
        let mut worklist = vec![(0usize, 0i32)];
        let mut max_depth = 0i32;

        while let Some((index, depth)) = worklist.pop() {
            if index >= self.instructions.len() {
                return Err(ClassFileError::MissingReturn);
            }
            match depth_at[index] {
                Some(seen) if seen == depth => continue,
                Some(seen) => {
                    return Err(ClassFileError::InconsistentStackDepth {
                        at: index,
                        first: seen,
                        second: depth,
                    });
                }
                None => depth_at[index] = Some(depth),
            }

            let instruction = self.instructions[index];
            let next_depth = depth + instruction.stack_delta();
            if next_depth < 0 {
                return Err(ClassFileError::OperandStackUnderflow { at: index });
            }
            max_depth = max_depth.max(next_depth);

            if let Some(label) = instruction.branch_target() {
                worklist.push((targets[label.0], next_depth));
            }
            match instruction {
                Instruction::Goto(_) | Instruction::Return => {}
                _ => worklist.push((index + 1, next_depth)),
            }
        }

        Ok(max_depth as u16)
    }
}

fn encode(
    instruction: Instruction,
    branch_offset: Option<i16>,
    out: &mut Vec<u8>,
) -> Result<(), ClassFileError> {
    match instruction {
        Instruction::Ldc(index) => {
            if index <= u8::MAX as u16 {
                out.write_u8(OP_LDC)?;
                out.write_u8(index as u8)?;
            } else {
                out.write_u8(OP_LDC_W)?;
                out.write_u16::<BigEndian>(index)?;
            }
        }
        Instruction::Ldc2W(index) => {
            out.write_u8(OP_LDC2_W)?;
            out.write_u16::<BigEndian>(index)?;
        }
        Instruction::Bipush(value) => {
            out.write_u8(OP_BIPUSH)?;
            out.write_i8(value)?;
        }
        Instruction::Iload(slot) => encode_var(OP_ILOAD, OP_ILOAD_0, slot, out)?,
        Instruction::Dload(slot) => encode_var(OP_DLOAD, OP_DLOAD_0, slot, out)?,
        Instruction::Aload(slot) => encode_var(OP_ALOAD, OP_ALOAD_0, slot, out)?,
        Instruction::Istore(slot) => encode_var(OP_ISTORE, OP_ISTORE_0, slot, out)?,
        Instruction::Dstore(slot) => encode_var(OP_DSTORE, OP_DSTORE_0, slot, out)?,
        Instruction::Astore(slot) => encode_var(OP_ASTORE, OP_ASTORE_0, slot, out)?,
        Instruction::Iadd => out.write_u8(OP_IADD)?,
        Instruction::Isub => out.write_u8(OP_ISUB)?,
        Instruction::Imul => out.write_u8(OP_IMUL)?,
        Instruction::Idiv => out.write_u8(OP_IDIV)?,
        Instruction::Ineg => out.write_u8(OP_INEG)?,
        Instruction::Dadd => out.write_u8(OP_DADD)?,
        Instruction::Dsub => out.write_u8(OP_DSUB)?,
        Instruction::Dmul => out.write_u8(OP_DMUL)?,
        Instruction::Ddiv => out.write_u8(OP_DDIV)?,
        Instruction::Dneg => out.write_u8(OP_DNEG)?,
        Instruction::Dcmpg => out.write_u8(OP_DCMPG)?,
        Instruction::IfIcmp(condition, _) => {
            out.write_u8(condition.opcode())?;
            out.write_i16::<BigEndian>(branch_offset.unwrap_or(0))?;
        }
        Instruction::IfAcmpEq(_) => {
            out.write_u8(OP_IF_ACMPEQ)?;
            out.write_i16::<BigEndian>(branch_offset.unwrap_or(0))?;
        }
        Instruction::IfAcmpNe(_) => {
            out.write_u8(OP_IF_ACMPNE)?;
            out.write_i16::<BigEndian>(branch_offset.unwrap_or(0))?;
        }
        Instruction::Goto(_) => {
            out.write_u8(OP_GOTO)?;
            out.write_i16::<BigEndian>(branch_offset.unwrap_or(0))?;
        }
        Instruction::Getstatic(index) => {
            out.write_u8(OP_GETSTATIC)?;
            out.write_u16::<BigEndian>(index)?;
        }
        Instruction::Invokevirtual { index, .. } => {
            out.write_u8(OP_INVOKEVIRTUAL)?;
            out.write_u16::<BigEndian>(index)?;
        }
        Instruction::Invokespecial(index) => {
            out.write_u8(OP_INVOKESPECIAL)?;
            out.write_u16::<BigEndian>(index)?;
        }
        Instruction::Return => out.write_u8(OP_RETURN)?,
    }
    Ok(())
}

fn encode_var(opcode: u8, compact_base: u8, slot: u16, out: &mut Vec<u8>) -> Result<(), ClassFileError> {
    if slot <= 3 {
        out.write_u8(compact_base + slot as u8)?;
    } else if slot <= u8::MAX as u16 {
        out.write_u8(opcode)?;
        out.write_u8(slot as u8)?;
    } else {
        out.write_u8(OP_WIDE)?;
        out.write_u8(opcode)?;
        out.write_u16::<BigEndian>(slot)?;
    }
    Ok(())
}
