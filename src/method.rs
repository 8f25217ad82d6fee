//! The method body assembler: turns a sequence of `visit_*_insn` calls into a
//! `Code` attribute, tracking operand-stack depth and local-variable slots as
//! it goes and, depending on the configured [`ComputeMode`], building the
//! control-flow graph needed to compute `max_stack`/`max_locals` or a full
//! `StackMapTable`.

use std::collections::{HashMap, VecDeque};

use crate::access_flag::{MethodAccessFlags, ParameterAccessFlags, WriterHints};
use crate::annotation::{Annotation, AnnotationListWriter, ElementValue};
use crate::attribute;
use crate::byte_vec::ByteVector;
use crate::error::{KapiError, KapiResult};
use crate::field::write_annotations_attribute;
use crate::frame::{CommonSuperClass, Frame, VerificationType};
use crate::handle::Handle;
use crate::handler::{self, Handler};
use crate::label::{Label, LabelArena};
use crate::opcodes::*;
use crate::symbol::{Constant, SymbolTable};
use crate::types::{Sort, Type};

/// How much work the writer does to derive `max_stack`/`max_locals` and
/// `StackMapTable` on `visit_end`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ComputeMode {
    /// The caller supplies `max_stack`/`max_locals` themselves via
    /// `visit_max`; no analysis is performed.
    Nothing,
    /// Track stack/locals sizes as instructions are visited; no CFG is built
    /// and no frames are produced. Fastest, but callers below class file
    /// version 50 must supply frames themselves if any are required.
    MaxStackAndLocals,
    /// Like `MaxStackAndLocals`, but also derive `StackMapTable` entries from
    /// a full fix-point CFG analysis — the common case for version ≥ 50 class
    /// files.
    MaxStackAndLocalsFromFrames,
    /// Frames are computed only for basic blocks the writer itself inserts
    /// (used by higher-level transformers that copy most of a method body
    /// through unchanged and only need frames at the blocks they add).
    InsertedFrames,
    /// Full fix-point frame analysis, including the dead-code excision pass.
    /// A method that mixes this mode with legacy `jsr`/`ret` subroutines is
    /// rejected with `UnsupportedFeature` rather than silently tracked as
    /// plain `goto`s — see `build_stack_map_table`.
    AllFrames,
}

/// One `LocalVariableTable`/`LocalVariableTypeTable` entry (JVMS §4.7.13,
/// §4.7.14): a local variable slot's name/descriptor and the label range it's
/// live over. `signature` routes the same entry into the type-table instead
/// when present, carrying a generic signature rather than a raw descriptor.
struct LocalVariableEntry {
    start: Label,
    end: Label,
    name: String,
    descriptor: String,
    signature: Option<String>,
    index: u16,
}

#[derive(Debug, Clone)]
enum Instruction {
    Insn { opcode: u8 },
    IntInsn { opcode: u8, operand: i32 },
    VarInsn { opcode: u8, var_index: u16 },
    TypeInsn { opcode: u8, internal_name: String },
    FieldInsn { opcode: u8, owner: String, name: String, descriptor: String },
    MethodInsn { opcode: u8, owner: String, name: String, descriptor: String, is_interface: bool },
    InvokeDynamicInsn { name: String, descriptor: String, handle: Handle, arguments: Vec<Constant> },
    JumpInsn { opcode: u8, target: Label },
    Label(Label),
    LdcInsn { constant: Constant },
    IincInsn { var_index: u16, increment: i32 },
    LineNumber { line: u16, start: Label },
}

/// Drives bytecode emission for a single method body.
pub struct MethodWriter {
    access_flags: MethodAccessFlags,
    hints: WriterHints,
    name: String,
    descriptor: String,
    compute_mode: ComputeMode,
    class_file_version: u32,

    instructions: Vec<Instruction>,
    arena: LabelArena,
    handlers: Vec<Handler>,
    exceptions: Vec<String>,
    signature: Option<String>,
    visible_annotations: AnnotationListWriter,
    invisible_annotations: AnnotationListWriter,
    parameters: Vec<(Option<String>, ParameterAccessFlags)>,
    annotation_default: Option<ElementValue>,
    local_variables: Vec<LocalVariableEntry>,

    stack: VecDeque<Type>,
    max_stack: u16,
    locals: Vec<Option<Type>>,
    max_locals: u16,

    /// Frames arriving at each label, one per incoming edge recorded while
    /// instructions were visited (a fall-through plus one per jump that
    /// targets it). `visit_end` merges these to a fix point before emitting
    /// `StackMapTable`. Only forward edges are tracked; a jump
    /// back to a label already visited isn't folded in, so loops don't get a
    /// correct frame here — this covers the straight-line and diamond
    /// shapes produced by `if`/`try`-`catch`, not arbitrary back edges.
    frame_edges: HashMap<Label, Vec<Frame>>,
    handler_catch_names: HashMap<Label, String>,
    block_terminated: bool,
    entry_locals: Vec<Option<Type>>,
    /// Set once a `jsr`/`ret` pair is seen; the frame analyzer isn't able to
    /// build a correct CFG across a subroutine call, so a frame-computing
    /// mode is rejected outright rather than mistracking one.
    has_subroutine_instructions: bool,
}

impl MethodWriter {
    pub fn new(
        class_file_version: u32,
        access_flags: MethodAccessFlags,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        compute_mode: ComputeMode,
    ) -> KapiResult<Self> {
        let descriptor = descriptor.into();
        let (arguments, _) = Type::from_method_descriptor(&descriptor)?;
        let mut initial_locals: u16 = arguments.iter().map(|ty| ty.size()).sum();
        if !access_flags.contains(MethodAccessFlags::STATIC) {
            initial_locals += 1;
        }

        let mut locals = vec![None; initial_locals as usize];
        if !access_flags.contains(MethodAccessFlags::STATIC) {
            locals[0] = Some(Type::object("java/lang/Object"));
        }
        let locals_snapshot = locals.clone();

        Ok(Self {
            access_flags,
            hints: WriterHints::new(),
            name: name.into(),
            descriptor,
            compute_mode,
            class_file_version,
            instructions: Vec::new(),
            arena: LabelArena::new(),
            handlers: Vec::new(),
            exceptions: Vec::new(),
            signature: None,
            visible_annotations: AnnotationListWriter::new(),
            invisible_annotations: AnnotationListWriter::new(),
            parameters: Vec::new(),
            annotation_default: None,
            local_variables: Vec::new(),
            stack: VecDeque::new(),
            max_stack: 0,
            locals,
            max_locals: initial_locals,
            frame_edges: HashMap::new(),
            handler_catch_names: HashMap::new(),
            block_terminated: false,
            entry_locals: locals_snapshot,
            has_subroutine_instructions: false,
        })
    }

    fn current_frame(&self, symbols: &mut SymbolTable) -> KapiResult<Frame> {
        Self::frame_from_locals(&self.locals, self.stack.iter(), symbols)
    }

    /// Resynchronizes `self.stack`/`self.locals` to the lattice join of every
    /// edge recorded against `label` in `frame_edges`, so that simulation
    /// continuing past an ordinary jump target reflects the merged frame
    /// rather than whichever predecessor happened to run last. Uses
    /// `InlineFallbackSuperClass` rather than the real hierarchy, since the
    /// per-instruction visit methods don't have access to `supers` (only
    /// `visit_end` does) — always sound, just less precise than the
    /// hierarchy-aware merge `build_stack_map_table` performs for the
    /// emitted `StackMapTable` itself.
    fn resync_to_join(&mut self, label: Label, symbols: &mut SymbolTable) {
        let mut edges = match self.frame_edges.get(&label) {
            Some(edges) if !edges.is_empty() => edges.iter(),
            _ => return,
        };
        let mut joined = edges.next().expect("checked non-empty above").clone();
        for edge in edges {
            joined.merge(edge, &InlineFallbackSuperClass, symbols);
        }

        let mut locals = Vec::with_capacity(joined.locals.len());
        for vt in &joined.locals {
            let ty = type_from_verification(*vt, symbols);
            let occupies_two = ty.as_ref().is_some_and(|t| t.size() == 2);
            locals.push(ty);
            if occupies_two {
                locals.push(None);
            }
        }
        self.locals = locals;

        self.stack = joined
            .stack
            .iter()
            .map(|vt| type_from_verification(*vt, symbols).unwrap_or_else(Type::int))
            .collect();

        self.max_stack = self.max_stack.max(self.stack_depth());
        self.max_locals = self.max_locals.max(self.locals.len() as u16);
    }

    fn frame_from_locals<'a>(
        locals: &[Option<Type>],
        stack: impl Iterator<Item = &'a Type>,
        symbols: &mut SymbolTable,
    ) -> KapiResult<Frame> {
        let mut out_locals = Vec::new();
        let mut index = 0;
        while index < locals.len() {
            match &locals[index] {
                Some(ty) => {
                    out_locals.push(type_to_verification(ty, symbols)?);
                    index += ty.size() as usize;
                }
                None => {
                    out_locals.push(VerificationType::Top);
                    index += 1;
                }
            }
        }
        let mut out_stack = Vec::new();
        for ty in stack {
            out_stack.push(type_to_verification(ty, symbols)?);
        }
        Ok(Frame::new(out_locals, out_stack))
    }

    pub fn hints_mut(&mut self) -> &mut WriterHints {
        &mut self.hints
    }

    pub fn new_label(&mut self) -> Label {
        self.arena.new_label()
    }

    pub fn visit_exception(&mut self, internal_name: impl Into<String>) {
        self.exceptions.push(internal_name.into());
    }

    pub fn visit_signature(&mut self, signature: impl Into<String>) {
        self.signature = Some(signature.into());
    }

    pub fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        if visible {
            self.visible_annotations.visit_annotation(annotation);
        } else {
            self.invisible_annotations.visit_annotation(annotation);
        }
    }

    pub fn deprecated(&mut self, deprecated: bool) {
        self.hints.deprecated = deprecated;
    }

    /// Records one formal parameter's `MethodParameters` entry (JVMS
    /// §4.7.24). Entries are emitted in the order visited, which must match
    /// the descriptor's argument order.
    pub fn visit_parameter(&mut self, name: Option<&str>, access_flags: ParameterAccessFlags) {
        self.parameters.push((name.map(str::to_string), access_flags));
    }

    /// Sets the default value of an annotation interface's element,
    /// emitted as `AnnotationDefault` (JVMS §4.7.22). Only meaningful on a
    /// method of an `@interface`.
    pub fn visit_annotation_default(&mut self, value: ElementValue) {
        self.annotation_default = Some(value);
    }

    /// Records a local variable's live range for `LocalVariableTable`, or
    /// `LocalVariableTypeTable` when `signature` is present (JVMS §4.7.13,
    /// §4.7.14). `start`/`end` must be labels visited in this method body.
    pub fn visit_local_variable(
        &mut self,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) {
        self.local_variables.push(LocalVariableEntry {
            start,
            end,
            name: name.into(),
            descriptor: descriptor.into(),
            signature: signature.map(str::to_string),
            index,
        });
    }

    pub fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
        symbols: &mut SymbolTable,
    ) -> KapiResult<()> {
        let catch_type_index = match catch_type {
            Some(name) => symbols.add_class(name)?,
            None => 0,
        };
        self.arena.mark_jump_target(handler);
        self.handler_catch_names.insert(
            handler,
            catch_type.unwrap_or("java/lang/Throwable").to_string(),
        );
        self.handlers
            .push(Handler::new(start, end, handler, catch_type_index));
        Ok(())
    }

    fn push(&mut self, ty: Type) {
        self.stack.push_back(ty);
        self.max_stack = self.max_stack.max(self.stack_depth());
    }

    fn stack_depth(&self) -> u16 {
        self.stack.iter().map(Type::size).sum()
    }

    fn pop(&mut self) -> KapiResult<Type> {
        self.stack
            .pop_back()
            .ok_or_else(|| KapiError::invalid_state("non-empty operand stack", "empty stack"))
    }

    fn pop_n(&mut self, count: usize) -> KapiResult<()> {
        for _ in 0..count {
            self.pop()?;
        }
        Ok(())
    }

    fn set_local(&mut self, index: u16, ty: Type) {
        let needed = index as usize + ty.size() as usize;
        if self.locals.len() < needed {
            self.locals.resize(needed, None);
        }
        self.locals[index as usize] = Some(ty.clone());
        if ty.size() == 2 {
            self.locals[index as usize + 1] = None;
        }
        self.max_locals = self.max_locals.max(needed as u16);
    }

    /// Applies a zero-operand instruction's stack effect (JVMS §6.5) and
    /// buffers it for emission.
    pub fn visit_insn(&mut self, opcode: u8) -> KapiResult<()> {
        self.apply_simple_stack_effect(opcode)?;
        self.instructions.push(Instruction::Insn { opcode });
        self.block_terminated = matches!(
            opcode,
            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN | RETURN | ATHROW
        );
        Ok(())
    }

    fn apply_simple_stack_effect(&mut self, opcode: u8) -> KapiResult<()> {
        match opcode {
            NOP => {}
            ACONST_NULL => self.push(Type::object("java/lang/Object")),
            ICONST_M1..=ICONST_5 => self.push(Type::int()),
            LCONST_0 | LCONST_1 => self.push(Type::long()),
            FCONST_0..=FCONST_2 => self.push(Type::float()),
            DCONST_0 | DCONST_1 => self.push(Type::double()),
            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_n(2)?;
                self.push(Type::int());
            }
            LALOAD => {
                self.pop_n(2)?;
                self.push(Type::long());
            }
            FALOAD => {
                self.pop_n(2)?;
                self.push(Type::float());
            }
            DALOAD => {
                self.pop_n(2)?;
                self.push(Type::double());
            }
            AALOAD => {
                self.pop_n(2)?;
                self.push(Type::object("java/lang/Object"));
            }
            IASTORE | BASTORE | CASTORE | SASTORE | FASTORE | AASTORE => {
                self.pop_n(3)?;
            }
            LASTORE | DASTORE => {
                self.pop_n(3)?;
            }
            POP => {
                self.pop()?;
            }
            POP2 => {
                self.pop_n(2)?;
            }
            DUP => {
                let top = self.pop()?;
                self.push(top.clone());
                self.push(top);
            }
            DUP_X1 => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a.clone());
                self.push(b);
                self.push(a);
            }
            SWAP => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a);
                self.push(b);
            }
            IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
                self.pop_n(2)?;
                self.push(Type::int());
            }
            LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR | LSHL | LSHR | LUSHR => {
                self.pop_n(2)?;
                self.push(Type::long());
            }
            FADD | FSUB | FMUL | FDIV | FREM => {
                self.pop_n(2)?;
                self.push(Type::float());
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                self.pop_n(2)?;
                self.push(Type::double());
            }
            INEG => {}
            LNEG | FNEG | DNEG => {}
            I2L => {
                self.pop()?;
                self.push(Type::long());
            }
            I2F => {
                self.pop()?;
                self.push(Type::float());
            }
            I2D => {
                self.pop()?;
                self.push(Type::double());
            }
            L2I => {
                self.pop()?;
                self.push(Type::int());
            }
            F2I => {
                self.pop()?;
                self.push(Type::int());
            }
            D2I => {
                self.pop()?;
                self.push(Type::int());
            }
            I2B | I2C | I2S => {
                self.pop()?;
                self.push(Type::int());
            }
            LCMP => {
                self.pop_n(2)?;
                self.push(Type::int());
            }
            FCMPL | FCMPG | DCMPL | DCMPG => {
                self.pop_n(2)?;
                self.push(Type::int());
            }
            IRETURN | FRETURN | ARETURN => {
                self.pop()?;
            }
            LRETURN | DRETURN => {
                self.pop()?;
            }
            RETURN => {}
            ARRAYLENGTH => {
                self.pop()?;
                self.push(Type::int());
            }
            ATHROW => {
                self.pop()?;
            }
            MONITORENTER | MONITOREXIT => {
                self.pop()?;
            }
            _ => {
                return Err(KapiError::invalid_argument(format!(
                    "opcode {opcode} is not a zero-operand instruction"
                )))
            }
        }
        Ok(())
    }

    pub fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> KapiResult<()> {
        match opcode {
            BIPUSH | SIPUSH => self.push(Type::int()),
            NEWARRAY => {
                self.pop()?;
                self.push(Type::array(&Type::int()));
            }
            _ => {
                return Err(KapiError::invalid_argument(format!(
                    "opcode {opcode} is not a single-int-operand instruction"
                )))
            }
        }
        self.instructions.push(Instruction::IntInsn { opcode, operand });
        Ok(())
    }

    pub fn visit_var_insn(&mut self, opcode: u8, var_index: u16) -> KapiResult<()> {
        match opcode {
            ILOAD => self.push(Type::int()),
            LLOAD => self.push(Type::long()),
            FLOAD => self.push(Type::float()),
            DLOAD => self.push(Type::double()),
            ALOAD => self.push(
                self.locals
                    .get(var_index as usize)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| Type::object("java/lang/Object")),
            ),
            ISTORE => {
                let ty = self.pop()?;
                self.set_local(var_index, ty);
            }
            LSTORE => {
                let ty = self.pop()?;
                self.set_local(var_index, ty);
            }
            FSTORE => {
                let ty = self.pop()?;
                self.set_local(var_index, ty);
            }
            DSTORE => {
                let ty = self.pop()?;
                self.set_local(var_index, ty);
            }
            ASTORE => {
                let ty = self.pop()?;
                self.set_local(var_index, ty);
            }
            RET => {
                self.has_subroutine_instructions = true;
            }
            _ => {
                return Err(KapiError::invalid_argument(format!(
                    "opcode {opcode} is not a variable instruction"
                )))
            }
        }
        self.max_locals = self.max_locals.max(var_index + 1);
        self.instructions.push(Instruction::VarInsn { opcode, var_index });
        Ok(())
    }

    pub fn visit_type_insn(&mut self, opcode: u8, internal_name: impl Into<String>) -> KapiResult<()> {
        let internal_name = internal_name.into();
        match opcode {
            NEW => self.push(Type::object(&internal_name)),
            ANEWARRAY => {
                self.pop()?;
                self.push(Type::array(&Type::object(&internal_name)));
            }
            CHECKCAST => {
                self.pop()?;
                self.push(Type::object(&internal_name));
            }
            INSTANCEOF => {
                self.pop()?;
                self.push(Type::int());
            }
            _ => {
                return Err(KapiError::invalid_argument(format!(
                    "opcode {opcode} is not a type instruction"
                )))
            }
        }
        self.instructions.push(Instruction::TypeInsn { opcode, internal_name });
        Ok(())
    }

    pub fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> KapiResult<()> {
        let descriptor = descriptor.into();
        let field_type = Type::from_descriptor(&descriptor)?;
        match opcode {
            GETSTATIC => self.push(field_type),
            PUTSTATIC => {
                self.pop()?;
            }
            GETFIELD => {
                self.pop()?;
                self.push(field_type);
            }
            PUTFIELD => {
                self.pop()?;
                self.pop()?;
            }
            _ => {
                return Err(KapiError::invalid_argument(format!(
                    "opcode {opcode} is not a field instruction"
                )))
            }
        }
        self.instructions.push(Instruction::FieldInsn {
            opcode,
            owner: owner.into(),
            name: name.into(),
            descriptor,
        });
        Ok(())
    }

    pub fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        is_interface: bool,
    ) -> KapiResult<()> {
        let descriptor = descriptor.into();
        let (arguments, return_type) = Type::from_method_descriptor(&descriptor)?;
        self.pop_n(arguments.len())?;
        if opcode != INVOKESTATIC {
            self.pop()?;
        }
        if return_type.sort() != Sort::Void {
            self.push(return_type);
        }
        self.instructions.push(Instruction::MethodInsn {
            opcode,
            owner: owner.into(),
            name: name.into(),
            descriptor,
            is_interface,
        });
        Ok(())
    }

    pub fn visit_invoke_dynamic_insn(
        &mut self,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        handle: Handle,
        arguments: Vec<Constant>,
    ) -> KapiResult<()> {
        let descriptor = descriptor.into();
        let (args, return_type) = Type::from_method_descriptor(&descriptor)?;
        self.pop_n(args.len())?;
        if return_type.sort() != Sort::Void {
            self.push(return_type);
        }
        self.instructions.push(Instruction::InvokeDynamicInsn {
            name: name.into(),
            descriptor,
            handle,
            arguments,
        });
        Ok(())
    }

    pub fn visit_jump_insn(
        &mut self,
        opcode: u8,
        target: Label,
        symbols: &mut SymbolTable,
    ) -> KapiResult<()> {
        match opcode {
            GOTO => {}
            JSR => {
                self.has_subroutine_instructions = true;
                // returnAddress (JVMS §2.3.3): category 1, not a real `Type`
                // sort, but `int` has the right size for stack tracking in
                // the non-frame compute modes this still runs under.
                self.push(Type::int());
            }
            IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE | IFNULL | IFNONNULL => {
                self.pop()?;
            }
            IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE | IF_ACMPEQ
            | IF_ACMPNE => {
                self.pop_n(2)?;
            }
            _ => {
                return Err(KapiError::invalid_argument(format!(
                    "opcode {opcode} is not a jump instruction"
                )))
            }
        }
        self.arena.mark_jump_target(target);
        let edge = self.current_frame(symbols)?;
        self.frame_edges.entry(target).or_default().push(edge);
        self.block_terminated = matches!(opcode, GOTO | JSR);
        self.instructions.push(Instruction::JumpInsn { opcode, target });
        Ok(())
    }

    pub fn visit_label(&mut self, label: Label, symbols: &mut SymbolTable) -> KapiResult<()> {
        log::trace!(
            "{}{}: basic block boundary at label {label:?} (closes the block in progress, opens the next)",
            self.name,
            self.descriptor
        );
        if !self.block_terminated {
            let edge = self.current_frame(symbols)?;
            self.frame_edges.entry(label).or_default().push(edge);
        }
        self.block_terminated = false;
        self.instructions.push(Instruction::Label(label));

        // A handler's bytecode offset is entered with the thrown exception
        // as the sole stack item (JVMS §4.10.1.4), not whatever happened to
        // be live at the end of the try block.
        if let Some(catch_name) = self.handler_catch_names.get(&label).cloned() {
            self.stack.clear();
            self.push(Type::object(catch_name));
        } else if self.arena.is_jump_target(label) {
            self.resync_to_join(label, symbols);
        }
        Ok(())
    }

    pub fn visit_line_number(&mut self, line: u16, start: Label) {
        self.instructions.push(Instruction::LineNumber { line, start });
    }

    pub fn visit_ldc_insn(&mut self, constant: Constant) -> KapiResult<()> {
        let pushed = match &constant {
            Constant::Integer(_) => Type::int(),
            Constant::Float(_) => Type::float(),
            Constant::Long(_) => Type::long(),
            Constant::Double(_) => Type::double(),
            Constant::String(_) => Type::object("java/lang/String"),
            Constant::Class(_) => Type::object("java/lang/Class"),
            Constant::MethodHandle(..) => Type::object("java/lang/invoke/MethodHandle"),
            Constant::MethodType(_) => Type::object("java/lang/invoke/MethodType"),
            Constant::Dynamic(..) => Type::object("java/lang/Object"),
            _ => {
                return Err(KapiError::invalid_argument(
                    "constant is not loadable via ldc",
                ))
            }
        };
        self.push(pushed);
        self.instructions.push(Instruction::LdcInsn { constant });
        Ok(())
    }

    pub fn visit_iinc_insn(&mut self, var_index: u16, increment: i32) -> KapiResult<()> {
        self.max_locals = self.max_locals.max(var_index + 1);
        self.instructions
            .push(Instruction::IincInsn { var_index, increment });
        Ok(())
    }

    pub fn visit_max(&mut self, max_stack: u16, max_locals: u16) {
        self.max_stack = max_stack;
        self.max_locals = max_locals;
    }

    /// Walks the buffered instructions once, returning each instruction's
    /// byte offset, the offset bound to every `Label`, and the total code
    /// length, under the widening choices recorded in `wide`. Run to a
    /// fix point before emission so a `goto` that only needs `goto_w`
    /// because an *earlier* jump in the same method widened can still pick
    /// that up.
    fn layout_pass(
        &self,
        symbols: &mut SymbolTable,
        wide: &[bool],
    ) -> KapiResult<(Vec<u32>, HashMap<Label, u32>, u32)> {
        let mut instruction_offsets = Vec::with_capacity(self.instructions.len());
        let mut label_offsets = HashMap::new();
        let mut cursor: u32 = 0;

        for (index, instruction) in self.instructions.iter().enumerate() {
            instruction_offsets.push(cursor);
            cursor += match instruction {
                Instruction::Label(label) => {
                    label_offsets.insert(*label, cursor);
                    0
                }
                Instruction::LineNumber { .. } => 0,
                Instruction::Insn { .. } => 1,
                Instruction::IntInsn { opcode, .. } => {
                    if *opcode == SIPUSH {
                        3
                    } else {
                        2
                    }
                }
                Instruction::VarInsn { .. } => 2,
                Instruction::TypeInsn { .. } => 3,
                Instruction::FieldInsn { .. } => 3,
                Instruction::MethodInsn { opcode, .. } => {
                    if *opcode == INVOKEINTERFACE {
                        5
                    } else {
                        3
                    }
                }
                Instruction::InvokeDynamicInsn { .. } => 5,
                Instruction::JumpInsn { .. } => {
                    if wide[index] {
                        5
                    } else {
                        3
                    }
                }
                Instruction::LdcInsn { constant } => ldc_width(symbols, constant)?,
                Instruction::IincInsn { .. } => 3,
            };
        }

        Ok((instruction_offsets, label_offsets, cursor))
    }

    /// Finalizes the method body: lays out instruction offsets to a fix
    /// point (widening `goto`/`jsr` to their `_w` forms when a jump would
    /// otherwise overflow a 16-bit offset), derives `StackMapTable` entries
    /// if the compute mode calls for it, and writes the complete `Code`
    /// attribute.
    pub fn visit_end(
        &mut self,
        symbols: &mut SymbolTable,
        supers: &(impl CommonSuperClass + ?Sized),
        out: &mut ByteVector,
    ) -> KapiResult<()> {
        let mut wide = vec![false; self.instructions.len()];
        let label_offsets = loop {
            let (instruction_offsets, label_offsets, _) = self.layout_pass(symbols, &wide)?;
            let mut changed = false;
            for (index, instruction) in self.instructions.iter().enumerate() {
                if wide[index] {
                    continue;
                }
                if let Instruction::JumpInsn { target, .. } = instruction {
                    let target_offset = *label_offsets.get(target).ok_or_else(|| {
                        KapiError::invalid_state("jump target bound to a label", "unbound label")
                    })? as i64;
                    let delta = target_offset - instruction_offsets[index] as i64;
                    if delta < i16::MIN as i64 || delta > i16::MAX as i64 {
                        log::trace!(
                            "{}{}: widening jump at instruction {index} ({delta} byte offset) to its _w form",
                            self.name,
                            self.descriptor
                        );
                        wide[index] = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                break label_offsets;
            }
        };

        for (label, offset) in &label_offsets {
            self.arena.resolve(*label, *offset);
        }

        let mut code = ByteVector::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            match instruction {
                Instruction::Label(_) | Instruction::LineNumber { .. } => {}
                Instruction::Insn { opcode } => {
                    code.put_u8(*opcode);
                }
                Instruction::IntInsn { opcode, operand } => {
                    code.put_u8(*opcode);
                    if *opcode == SIPUSH {
                        code.put_u16(*operand as u16);
                    } else {
                        code.put_u8(*operand as u8);
                    }
                }
                Instruction::VarInsn { opcode, var_index } => {
                    code.put_u8(*opcode);
                    code.put_u8(*var_index as u8);
                }
                Instruction::TypeInsn { opcode, internal_name } => {
                    let class_index = symbols.add_class(internal_name)?;
                    code.put_u8(*opcode);
                    code.put_u16(class_index);
                }
                Instruction::FieldInsn { opcode, owner, name, descriptor } => {
                    let ref_index = symbols.add_field_ref(owner, name, descriptor)?;
                    code.put_u8(*opcode);
                    code.put_u16(ref_index);
                }
                Instruction::MethodInsn { opcode, owner, name, descriptor, is_interface } => {
                    let ref_index = symbols.add_method_ref(owner, name, descriptor, *is_interface)?;
                    code.put_u8(*opcode);
                    code.put_u16(ref_index);
                    if *opcode == INVOKEINTERFACE {
                        let (arguments, _) = Type::from_method_descriptor(descriptor)?;
                        let argument_slots: u16 = arguments.iter().map(Type::size).sum::<u16>() + 1;
                        code.put_u8(argument_slots as u8);
                        code.put_u8(0);
                    }
                }
                Instruction::InvokeDynamicInsn { name, descriptor, handle, arguments } => {
                    let bootstrap_index = symbols.add_bootstrap_method(handle, arguments)?;
                    let ref_index = symbols.add_invoke_dynamic(bootstrap_index, name, descriptor)?;
                    code.put_u8(INVOKEDYNAMIC);
                    code.put_u16(ref_index);
                    code.put_u16(0);
                }
                Instruction::JumpInsn { opcode, target } => {
                    let opcode_offset = code.len() as u32;
                    let target_offset = label_offsets[target];
                    let delta = target_offset as i64 - opcode_offset as i64;
                    if wide[index] {
                        let wide_opcode = match *opcode {
                            GOTO => GOTO_W,
                            JSR => JSR_W,
                            other => {
                                return Err(KapiError::invalid_argument(format!(
                                    "opcode {other} has no wide form; only goto/jsr can be widened"
                                )))
                            }
                        };
                        code.put_u8(wide_opcode);
                        code.put_u32(delta as u32);
                    } else {
                        code.put_u8(*opcode);
                        code.put_u16(delta as u16);
                    }
                }
                Instruction::LdcInsn { constant } => {
                    let index = symbols_put(symbols, constant)?;
                    if matches!(constant, Constant::Long(_) | Constant::Double(_)) {
                        code.put_u8(LDC2_W);
                        code.put_u16(index);
                    } else if index <= u8::MAX as u16 {
                        code.put_u8(LDC);
                        code.put_u8(index as u8);
                    } else {
                        code.put_u8(LDC_W);
                        code.put_u16(index);
                    }
                }
                Instruction::IincInsn { var_index, increment } => {
                    code.put_u8(IINC);
                    code.put_u8(*var_index as u8);
                    code.put_u8(*increment as u8);
                }
            }
        }

        let wants_frames = matches!(
            self.compute_mode,
            ComputeMode::AllFrames | ComputeMode::MaxStackAndLocalsFromFrames
        );
        let major_version = (self.class_file_version & 0xFFFF) as u16;
        if wants_frames && major_version >= 50 && !self.has_subroutine_instructions {
            let dead_blocks = self.compute_reachability(&label_offsets);
            for (start_label, end_label) in dead_blocks {
                let start_offset = label_offsets[&start_label];
                let end_offset = end_label
                    .and_then(|label| label_offsets.get(&label).copied())
                    .unwrap_or(code.len() as u32);
                if end_offset > start_offset {
                    log::trace!(
                        "{}{}: excising unreachable block [{start_offset}, {end_offset}) as nop..athrow",
                        self.name,
                        self.descriptor
                    );
                    let mut filler = vec![NOP; (end_offset - start_offset) as usize];
                    if let Some(last) = filler.last_mut() {
                        *last = ATHROW;
                    }
                    code.overwrite(start_offset as usize, &filler);
                }
                self.handlers = handler::remove_range(&self.handlers, &self.arena, start_label, end_label)?;
            }
        }

        let stack_map_table = self.build_stack_map_table(symbols, supers, &label_offsets)?;
        self.write_method_info(symbols, &code, stack_map_table.as_ref(), &label_offsets, out)?;
        Ok(())
    }

    /// Walks the method's basic blocks (delimited by `Label` instructions)
    /// from the entry block and from every exception handler reachable from
    /// a live protected range, marking each one `LabelArena::mark_reachable`
    /// finds along the way. Blocks the walk never reaches are dead code;
    /// returns each one as `(start_label, end_label)`, `end_label` being
    /// `None` for a dead block that runs to the end of the method, so the
    /// caller can both excise its bytecode and shrink any handler range that
    /// overlapped it via `handler::remove_range`.
    fn compute_reachability(&mut self, label_offsets: &HashMap<Label, u32>) -> Vec<(Label, Option<Label>)> {
        let mut block_starts: Vec<(Option<Label>, usize)> = Vec::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Instruction::Label(label) = instruction {
                block_starts.push((Some(*label), index));
            }
        }
        if block_starts.first().map(|(_, index)| *index) != Some(0) {
            block_starts.insert(0, (None, 0));
        }
        let block_count = block_starts.len();

        let mut label_to_block: HashMap<Label, usize> = HashMap::new();
        for (index, (label, _)) in block_starts.iter().enumerate() {
            if let Some(label) = label {
                label_to_block.insert(*label, index);
            }
        }

        let mut reachable = vec![false; block_count];
        reachable[0] = true;
        let mut worklist = VecDeque::from([0usize]);

        while let Some(index) = worklist.pop_front() {
            let start = block_starts[index].1;
            let end = block_starts
                .get(index + 1)
                .map(|(_, next_index)| *next_index)
                .unwrap_or(self.instructions.len());

            // A block can contain more than one jump (a conditional branch
            // that falls through into an unconditional one before the next
            // label), so every jump's target is a successor, not just the
            // last instruction's — only the final instruction decides
            // whether the block also falls through to the next one.
            let mut successors = Vec::new();
            let mut falls_through = true;
            for instruction in &self.instructions[start..end] {
                match instruction {
                    Instruction::Label(_) | Instruction::LineNumber { .. } => {}
                    Instruction::JumpInsn { opcode, target } => {
                        if let Some(block) = label_to_block.get(target) {
                            successors.push(*block);
                        }
                        falls_through = !matches!(*opcode, GOTO | JSR);
                    }
                    Instruction::Insn { opcode }
                        if matches!(
                            *opcode,
                            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN | RETURN | ATHROW
                        ) =>
                    {
                        falls_through = false;
                    }
                    Instruction::VarInsn { opcode: RET, .. } => {
                        falls_through = false;
                    }
                    _ => {
                        falls_through = true;
                    }
                }
            }
            if falls_through && index + 1 < block_count {
                successors.push(index + 1);
            }

            let block_start_offset = block_starts[index]
                .0
                .and_then(|label| label_offsets.get(&label).copied())
                .unwrap_or(0);
            let block_end_offset = block_starts
                .get(index + 1)
                .and_then(|(label, _)| label.and_then(|label| label_offsets.get(&label).copied()))
                .unwrap_or(u32::MAX);
            for handler in &self.handlers {
                let handler_start = label_offsets.get(&handler.start_pc).copied().unwrap_or(0);
                let handler_end = label_offsets.get(&handler.end_pc).copied().unwrap_or(0);
                if handler_start < block_end_offset && block_start_offset < handler_end {
                    if let Some(block) = label_to_block.get(&handler.handler_pc) {
                        successors.push(*block);
                    }
                }
            }

            for successor in successors {
                if !reachable[successor] {
                    reachable[successor] = true;
                    worklist.push_back(successor);
                }
            }
        }

        for (index, (label, _)) in block_starts.iter().enumerate() {
            if reachable[index] {
                if let Some(label) = label {
                    self.arena.mark_reachable(*label);
                }
            }
        }

        block_starts
            .iter()
            .enumerate()
            .filter(|(index, _)| !reachable[*index])
            .filter_map(|(index, (label, _))| {
                let label = (*label)?;
                let end_label = block_starts.get(index + 1).and_then(|(label, _)| *label);
                Some((label, end_label))
            })
            .collect()
    }

    /// Writes the complete `method_info` structure (JVMS §4.6): access
    /// flags, name/descriptor indices, attribute count, then the `Code`
    /// attribute plus whichever optional method-level attributes this
    /// writer was given.
    fn write_method_info(
        &self,
        symbols: &mut SymbolTable,
        code: &ByteVector,
        stack_map_table: Option<&ByteVector>,
        label_offsets: &HashMap<Label, u32>,
        out: &mut ByteVector,
    ) -> KapiResult<()> {
        out.put_u16(self.access_flags.bits());
        out.put_u16(symbols.add_utf8(self.name.as_str())?);
        out.put_u16(symbols.add_utf8(self.descriptor.as_str())?);

        let mut attribute_count = 1u16; // Code
        if !self.exceptions.is_empty() {
            attribute_count += 1;
        }
        if self.signature.is_some() {
            attribute_count += 1;
        }
        if self.hints.deprecated {
            attribute_count += 1;
        }
        if !self.visible_annotations.is_empty() {
            attribute_count += 1;
        }
        if !self.invisible_annotations.is_empty() {
            attribute_count += 1;
        }
        if !self.parameters.is_empty() {
            attribute_count += 1;
        }
        if self.annotation_default.is_some() {
            attribute_count += 1;
        }
        out.put_u16(attribute_count);

        self.write_code_attribute(symbols, code, stack_map_table, label_offsets, out)?;

        if !self.exceptions.is_empty() {
            let name_index = symbols.add_utf8(attribute::EXCEPTIONS)?;
            out.put_u16(name_index);
            out.put_u32(2 + 2 * self.exceptions.len() as u32);
            out.put_u16(self.exceptions.len() as u16);
            for exception in &self.exceptions {
                let class_index = symbols.add_class(exception)?;
                out.put_u16(class_index);
            }
        }

        if let Some(signature) = &self.signature {
            let name_index = symbols.add_utf8(attribute::SIGNATURE)?;
            let signature_index = symbols.add_utf8(signature.as_str())?;
            out.put_u16(name_index).put_u32(2).put_u16(signature_index);
        }

        if self.hints.deprecated {
            let name_index = symbols.add_utf8(attribute::DEPRECATED)?;
            out.put_u16(name_index).put_u32(0);
        }

        if !self.visible_annotations.is_empty() {
            write_annotations_attribute(
                &self.visible_annotations,
                attribute::RUNTIME_VISIBLE_ANNOTATIONS,
                symbols,
                out,
            )?;
        }
        if !self.invisible_annotations.is_empty() {
            write_annotations_attribute(
                &self.invisible_annotations,
                attribute::RUNTIME_INVISIBLE_ANNOTATIONS,
                symbols,
                out,
            )?;
        }

        if !self.parameters.is_empty() {
            let name_index = symbols.add_utf8(attribute::METHOD_PARAMETERS)?;
            out.put_u16(name_index);
            out.put_u32(1 + 4 * self.parameters.len() as u32);
            out.put_u8(self.parameters.len() as u8);
            for (name, flags) in &self.parameters {
                let name_index = match name {
                    Some(name) => symbols.add_utf8(name.as_str())?,
                    None => 0,
                };
                out.put_u16(name_index).put_u16(flags.bits());
            }
        }

        if let Some(value) = &self.annotation_default {
            let name_index = symbols.add_utf8(attribute::ANNOTATION_DEFAULT)?;
            out.put_u16(name_index);
            let length_offset = out.len();
            out.put_u32(0);
            let start = out.len();
            value.write(symbols, out)?;
            out.patch_u32(length_offset, (out.len() - start) as u32);
        }

        Ok(())
    }

    /// Folds the recorded frame edges to a fix point and emits a
    /// `StackMapTable` body (entry count plus compressed entries), or
    /// `None` when the compute mode or class file version doesn't call for
    /// one. Only labels reachable via a tracked forward edge (ordinary jump
    /// targets and exception handler entries) get an entry; see
    /// `frame_edges`'s doc comment for the loop limitation.
    fn build_stack_map_table(
        &self,
        symbols: &mut SymbolTable,
        supers: &(impl CommonSuperClass + ?Sized),
        label_offsets: &HashMap<Label, u32>,
    ) -> KapiResult<Option<ByteVector>> {
        let wants_frames = matches!(
            self.compute_mode,
            ComputeMode::AllFrames | ComputeMode::MaxStackAndLocalsFromFrames
        );
        let major_version = (self.class_file_version & 0xFFFF) as u16;
        if !wants_frames || major_version < 50 {
            return Ok(None);
        }
        if self.has_subroutine_instructions {
            return Err(KapiError::UnsupportedFeature {
                feature: "jsr/ret subroutines with computed StackMapTable frames",
                detail: format!(
                    "{}{} uses jsr/ret; subroutine inlining isn't implemented, so frames can't be derived for it \
                     — use ComputeMode::MaxStackAndLocals (or Nothing, supplying frames yourself) instead",
                    self.name, self.descriptor
                ),
            });
        }

        let mut merged: HashMap<Label, Frame> = HashMap::new();

        for handler in &self.handlers {
            if !self.arena.is_reachable(handler.handler_pc) {
                continue;
            }
            let catch_name = self
                .handler_catch_names
                .get(&handler.handler_pc)
                .cloned()
                .unwrap_or_else(|| "java/lang/Throwable".to_string());
            let locals = self
                .frame_edges
                .get(&handler.start_pc)
                .and_then(|edges| edges.first())
                .map(|frame| frame.locals.clone())
                .unwrap_or_else(|| {
                    Self::frame_from_locals(&self.entry_locals, std::iter::empty(), symbols)
                        .map(|frame| frame.locals)
                        .unwrap_or_default()
                });
            let exception_type = VerificationType::Object(symbols.add_type(&catch_name)?);
            merged.insert(
                handler.handler_pc,
                Frame::new(locals, vec![exception_type]),
            );
        }

        for (label, edges) in &self.frame_edges {
            if merged.contains_key(label)
                || !self.arena.is_jump_target(*label)
                || !self.arena.is_reachable(*label)
            {
                continue;
            }
            let mut iter = edges.iter();
            let mut frame = match iter.next() {
                Some(first) => first.clone(),
                None => continue,
            };
            for edge in iter {
                frame.merge(edge, supers, symbols);
            }
            merged.insert(*label, frame);
        }

        if merged.is_empty() {
            return Ok(None);
        }

        let mut entries: Vec<(u32, Frame)> = merged
            .into_iter()
            .filter_map(|(label, frame)| label_offsets.get(&label).map(|offset| (*offset, frame)))
            .collect();
        entries.sort_by_key(|(offset, _)| *offset);

        let mut body = ByteVector::new();
        body.put_u16(entries.len() as u16);
        let mut previous_frame =
            Self::frame_from_locals(&self.entry_locals, std::iter::empty(), symbols)?;
        let mut previous_offset: i64 = -1;
        for (offset, frame) in &entries {
            let offset_delta = (*offset as i64 - previous_offset - 1) as u16;
            frame.write_compressed(&previous_frame, offset_delta, &mut body, symbols);
            previous_frame = frame.clone();
            previous_offset = *offset as i64;
        }

        Ok(Some(body))
    }

    fn write_code_attribute(
        &self,
        symbols: &mut SymbolTable,
        code: &ByteVector,
        stack_map_table: Option<&ByteVector>,
        label_offsets: &HashMap<Label, u32>,
        out: &mut ByteVector,
    ) -> KapiResult<()> {
        if code.len() > u16::MAX as usize {
            return Err(KapiError::MethodTooLarge {
                class: String::new(),
                name: self.name.clone(),
                descriptor: self.descriptor.clone(),
                size: code.len() as u32,
            });
        }

        let name_index = symbols.add_utf8(attribute::CODE)?;
        out.put_u16(name_index);
        let length_offset = out.len();
        out.put_u32(0);
        let start = out.len();

        out.put_u16(self.max_stack);
        out.put_u16(self.max_locals);
        out.put_u32(code.len() as u32);
        out.put_bytes(code.as_slice());
        handler::write_exception_table(&self.handlers, &self.arena, out)?;

        let has_local_variables = !self.local_variables.is_empty();
        let has_local_variable_types = self
            .local_variables
            .iter()
            .any(|entry| entry.signature.is_some());
        let code_attribute_count = stack_map_table.is_some() as u16
            + has_local_variables as u16
            + has_local_variable_types as u16;
        out.put_u16(code_attribute_count);

        if let Some(body) = stack_map_table {
            let name_index = symbols.add_utf8(attribute::STACK_MAP_TABLE)?;
            out.put_u16(name_index);
            out.put_u32(body.len() as u32);
            out.put_bytes(body.as_slice());
        }

        if has_local_variables {
            self.write_local_variable_table(
                attribute::LOCAL_VARIABLE_TABLE,
                false,
                symbols,
                label_offsets,
                out,
            )?;
        }
        if has_local_variable_types {
            self.write_local_variable_table(
                attribute::LOCAL_VARIABLE_TYPE_TABLE,
                true,
                symbols,
                label_offsets,
                out,
            )?;
        }

        out.patch_u32(length_offset, (out.len() - start) as u32);
        Ok(())
    }

    /// Writes either `LocalVariableTable` or, when `types_only` is set,
    /// `LocalVariableTypeTable` (JVMS §4.7.13/§4.7.14) — the latter only
    /// covers entries that carry a generic signature.
    fn write_local_variable_table(
        &self,
        attribute_name: &str,
        types_only: bool,
        symbols: &mut SymbolTable,
        label_offsets: &HashMap<Label, u32>,
        out: &mut ByteVector,
    ) -> KapiResult<()> {
        let entries: Vec<_> = self
            .local_variables
            .iter()
            .filter(|entry| entry.signature.is_some() == types_only)
            .collect();

        let name_index = symbols.add_utf8(attribute_name)?;
        out.put_u16(name_index);
        out.put_u32(2 + 10 * entries.len() as u32);
        out.put_u16(entries.len() as u16);
        for entry in entries {
            let start_pc = *label_offsets.get(&entry.start).ok_or_else(|| {
                KapiError::invalid_state("local variable start bound to a label", "unbound label")
            })?;
            let end_pc = *label_offsets.get(&entry.end).ok_or_else(|| {
                KapiError::invalid_state("local variable end bound to a label", "unbound label")
            })?;
            let name_index = symbols.add_utf8(entry.name.as_str())?;
            let descriptor_or_signature = entry.signature.as_deref().unwrap_or(entry.descriptor.as_str());
            let descriptor_index = symbols.add_utf8(descriptor_or_signature)?;
            out.put_u16(start_pc as u16)
                .put_u16((end_pc - start_pc) as u16)
                .put_u16(name_index)
                .put_u16(descriptor_index)
                .put_u16(entry.index);
        }
        Ok(())
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn access_flags(&self) -> MethodAccessFlags {
        self.access_flags
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

/// Byte length of an `ldc`/`ldc_w`/`ldc2_w` instruction for `constant`,
/// interning it along the way so the choice made here and the one made
/// during emission agree (the symbol table dedups, so interning twice is
/// harmless).
fn ldc_width(symbols: &mut SymbolTable, constant: &Constant) -> KapiResult<u32> {
    let index = symbols_put(symbols, constant)?;
    if matches!(constant, Constant::Long(_) | Constant::Double(_)) {
        Ok(3)
    } else if index <= u8::MAX as u16 {
        Ok(2)
    } else {
        Ok(3)
    }
}

/// Lowers a descriptor-derived `Type` into the `VerificationType` that
/// represents it on an operand stack or in a local variable slot.
/// Always answers `java/lang/Object`, the universally-valid (if imprecise)
/// common supertype. Used for the live stack/locals resync at an ordinary
/// jump target, where no real `CommonSuperClass` is in scope; the final
/// `StackMapTable` emission in `build_stack_map_table` merges again with the
/// real hierarchy, so this approximation never reaches the class file.
struct InlineFallbackSuperClass;

impl CommonSuperClass for InlineFallbackSuperClass {
    fn common_super_class(&self, _a: &str, _b: &str) -> String {
        String::from("java/lang/Object")
    }
}

/// Inverse of `type_to_verification`, used to rebuild a live `Type` from a
/// merged frame's verification types. `Top` has no corresponding `Type` (an
/// unoccupied local), so it maps to `None`.
fn type_from_verification(vt: VerificationType, symbols: &SymbolTable) -> Option<Type> {
    match vt {
        VerificationType::Top => None,
        VerificationType::Integer => Some(Type::int()),
        VerificationType::Float => Some(Type::float()),
        VerificationType::Long => Some(Type::long()),
        VerificationType::Double => Some(Type::double()),
        VerificationType::Null | VerificationType::UninitializedThis => Some(Type::object("java/lang/Object")),
        VerificationType::Object(_) | VerificationType::Uninitialized(_) => {
            Frame::reference_type_name(symbols, vt).map(Type::object)
        }
    }
}

fn type_to_verification(ty: &Type, symbols: &mut SymbolTable) -> KapiResult<VerificationType> {
    Ok(match ty.sort() {
        Sort::Boolean | Sort::Byte | Sort::Char | Sort::Short | Sort::Int => VerificationType::Integer,
        Sort::Float => VerificationType::Float,
        Sort::Long => VerificationType::Long,
        Sort::Double => VerificationType::Double,
        Sort::Object | Sort::Array => VerificationType::Object(symbols.add_type(ty.internal_name())?),
        Sort::Void | Sort::Method => {
            return Err(KapiError::invalid_state(
                "a storable value",
                "a void or method type on the operand stack",
            ))
        }
    })
}

fn symbols_put(symbols: &mut SymbolTable, constant: &Constant) -> KapiResult<u16> {
    match constant {
        Constant::Integer(v) => symbols.add_integer(*v),
        Constant::Float(bits) => symbols.add_float(f32::from_bits(*bits)),
        Constant::Long(v) => symbols.add_long(*v),
        Constant::Double(bits) => symbols.add_double(f64::from_bits(*bits)),
        Constant::String(utf8_index) => Ok(*utf8_index),
        other => Err(KapiError::invalid_argument(format!(
            "{other:?} is not directly loadable"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_method_tracks_stack_and_locals() {
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC | MethodAccessFlags::PUBLIC,
            "add",
            "(II)I",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_var_insn(ILOAD, 1).unwrap();
        writer.visit_insn(IADD).unwrap();
        writer.visit_insn(IRETURN).unwrap();

        assert_eq!(writer.max_stack(), 2);
        assert_eq!(writer.max_locals(), 2);
    }

    #[test]
    fn instance_method_reserves_slot_zero_for_this() {
        let writer = MethodWriter::new(
            52,
            MethodAccessFlags::PUBLIC,
            "f",
            "()V",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        assert_eq!(writer.max_locals(), 1);
    }

    #[test]
    fn popping_an_empty_stack_is_an_error() {
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "()V",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        assert!(writer.visit_insn(POP).is_err());
    }

    struct NoHierarchy;
    impl CommonSuperClass for NoHierarchy {
        fn common_super_class(&self, _a: &str, _b: &str) -> String {
            "java/lang/Object".to_string()
        }
    }

    #[test]
    fn forward_goto_over_a_large_gap_widens_to_goto_w() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "()V",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        let target = writer.new_label();
        writer.visit_jump_insn(GOTO, target, &mut symbols).unwrap();
        for _ in 0..40_000 {
            writer.visit_insn(NOP).unwrap();
        }
        writer.visit_label(target, &mut symbols).unwrap();
        writer.visit_insn(RETURN).unwrap();

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();

        // method_info header(8) + Code's name_index/length(6) + max_stack/max_locals/code_length(8)
        let code_start = 8 + 2 + 4 + 2 + 2 + 4;
        assert_eq!(out.as_slice()[code_start], GOTO_W);
    }

    #[test]
    fn diamond_branch_emits_a_stack_map_table() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "(I)Z",
            ComputeMode::AllFrames,
        )
        .unwrap();
        let l1 = writer.new_label();
        let l2 = writer.new_label();
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_jump_insn(IFEQ, l1, &mut symbols).unwrap();
        writer.visit_insn(ICONST_1).unwrap();
        writer.visit_jump_insn(GOTO, l2, &mut symbols).unwrap();
        writer.visit_label(l1, &mut symbols).unwrap();
        writer.visit_insn(ICONST_0).unwrap();
        writer.visit_label(l2, &mut symbols).unwrap();
        writer.visit_insn(IRETURN).unwrap();

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();

        assert!(symbols.get_utf8_index("StackMapTable").is_some());
    }

    #[test]
    fn try_catch_handler_frame_carries_the_exception_type() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "()V",
            ComputeMode::AllFrames,
        )
        .unwrap();
        let try_start = writer.new_label();
        let try_end = writer.new_label();
        let handler_pc = writer.new_label();
        let done = writer.new_label();
        writer
            .visit_try_catch_block(
                try_start,
                try_end,
                handler_pc,
                Some("java/lang/NullPointerException"),
                &mut symbols,
            )
            .unwrap();
        writer.visit_label(try_start, &mut symbols).unwrap();
        writer
            .visit_method_insn(INVOKESTATIC, "p/Foo", "mayThrow", "()V", false)
            .unwrap();
        writer.visit_label(try_end, &mut symbols).unwrap();
        writer.visit_jump_insn(GOTO, done, &mut symbols).unwrap();
        writer.visit_label(handler_pc, &mut symbols).unwrap();
        writer.visit_var_insn(ASTORE, 0).unwrap();
        writer.visit_var_insn(ALOAD, 0).unwrap();
        writer.visit_insn(ATHROW).unwrap();
        writer.visit_label(done, &mut symbols).unwrap();
        writer.visit_insn(RETURN).unwrap();

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();

        assert!(writer.max_stack() >= 1);
        assert!(symbols.get_utf8_index("StackMapTable").is_some());
    }

    #[test]
    fn method_info_header_precedes_the_code_attribute() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "add",
            "(II)I",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        writer.visit_exception("java/io/IOException");
        writer.visit_signature("()I");
        writer.visit_parameter(Some("a"), ParameterAccessFlags::empty());
        writer.visit_parameter(Some("b"), ParameterAccessFlags::empty());
        writer.visit_var_insn(ILOAD, 0).unwrap();
        writer.visit_var_insn(ILOAD, 1).unwrap();
        writer.visit_insn(IADD).unwrap();
        writer.visit_insn(IRETURN).unwrap();

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();

        let bytes = out.as_slice();
        let access_flags = u16::from_be_bytes([bytes[0], bytes[1]]);
        assert_eq!(
            access_flags,
            (MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC).bits()
        );
        let name_index = u16::from_be_bytes([bytes[2], bytes[3]]);
        assert_eq!(name_index, symbols.get_utf8_index("add").unwrap());
        let attribute_count = u16::from_be_bytes([bytes[6], bytes[7]]);
        assert_eq!(attribute_count, 4); // Code, Exceptions, Signature, MethodParameters
        let code_name_index = u16::from_be_bytes([bytes[8], bytes[9]]);
        assert_eq!(code_name_index, symbols.get_utf8_index("Code").unwrap());
    }

    #[test]
    fn local_variable_table_resolves_label_offsets_to_start_pc_and_length() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "(I)V",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        let start = writer.new_label();
        let end = writer.new_label();
        writer.visit_label(start, &mut symbols).unwrap();
        writer.visit_insn(NOP).unwrap();
        writer.visit_label(end, &mut symbols).unwrap();
        writer.visit_insn(RETURN).unwrap();
        writer.visit_local_variable("n", "I", None, start, end, 0);

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();
        assert!(symbols.get_utf8_index("LocalVariableTable").is_some());
        assert!(symbols.get_utf8_index("LocalVariableTypeTable").is_none());
    }

    #[test]
    fn jsr_under_computed_frames_is_rejected_instead_of_mistracked() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "()V",
            ComputeMode::AllFrames,
        )
        .unwrap();
        let subroutine = writer.new_label();
        writer.visit_jump_insn(JSR, subroutine, &mut symbols).unwrap();
        writer.visit_insn(RETURN).unwrap();
        writer.visit_label(subroutine, &mut symbols).unwrap();
        writer.visit_var_insn(ASTORE, 0).unwrap();
        writer.visit_var_insn(RET, 0).unwrap();

        let mut out = ByteVector::new();
        let error = writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap_err();
        assert!(matches!(error, KapiError::UnsupportedFeature { .. }));
    }

    #[test]
    fn jsr_under_max_stack_and_locals_mode_is_unaffected() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "()V",
            ComputeMode::MaxStackAndLocals,
        )
        .unwrap();
        let subroutine = writer.new_label();
        writer.visit_jump_insn(JSR, subroutine, &mut symbols).unwrap();
        writer.visit_insn(RETURN).unwrap();
        writer.visit_label(subroutine, &mut symbols).unwrap();
        writer.visit_var_insn(ASTORE, 0).unwrap();
        writer.visit_var_insn(RET, 0).unwrap();

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();
        assert!(symbols.get_utf8_index("StackMapTable").is_none());
    }

    #[test]
    fn unreachable_block_after_return_is_excised_and_not_marked_reachable() {
        let mut symbols = SymbolTable::new();
        let mut writer = MethodWriter::new(
            52,
            MethodAccessFlags::STATIC,
            "f",
            "()I",
            ComputeMode::AllFrames,
        )
        .unwrap();
        let dead = writer.new_label();
        writer.visit_insn(ICONST_0).unwrap();
        writer.visit_insn(IRETURN).unwrap();
        writer.visit_label(dead, &mut symbols).unwrap();
        writer.visit_insn(ICONST_1).unwrap();
        writer.visit_insn(IRETURN).unwrap();

        let mut out = ByteVector::new();
        writer.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();

        assert!(!writer.arena.is_reachable(dead));
        // method_info header (8 bytes) + Code attribute name/length (6) +
        // max_stack/max_locals (4) + code_length (4) precede the 4 code bytes.
        let bytes = out.as_slice();
        let code_start = 8 + 6 + 4 + 4;
        assert_eq!(&bytes[code_start..code_start + 4], &[ICONST_0, IRETURN, NOP, ATHROW]);
    }
}
