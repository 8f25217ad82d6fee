//! Verification types and `StackMapTable` frame computation.
//!
//! ASM packs a verification type into a single bit-fielded `i32` (dimension /
//! kind / flags / value). This crate lowers that packing into an enum —
//! behaviorally identical, but it lets the frame merge and instruction
//! dispatch code pattern-match instead of shifting and masking everywhere.

use crate::symbol::SymbolTable;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Index into the `SymbolTable` type table (an interned `Class` entry).
    Object(u32),
    /// Index into the type table, pointing at an `Uninitialized` entry (the
    /// bytecode offset of the `new` that produced this value).
    Uninitialized(u32),
}

impl VerificationType {
    pub fn size(self) -> u16 {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }

    fn item_tag(self) -> u8 {
        match self {
            VerificationType::Top => crate::opcodes::ITEM_TOP,
            VerificationType::Integer => crate::opcodes::ITEM_INTEGER,
            VerificationType::Float => crate::opcodes::ITEM_FLOAT,
            VerificationType::Double => crate::opcodes::ITEM_DOUBLE,
            VerificationType::Long => crate::opcodes::ITEM_LONG,
            VerificationType::Null => crate::opcodes::ITEM_NULL,
            VerificationType::UninitializedThis => crate::opcodes::ITEM_UNINITIALIZED_THIS,
            VerificationType::Object(_) => crate::opcodes::ITEM_OBJECT,
            VerificationType::Uninitialized(_) => crate::opcodes::ITEM_UNINITIALIZED,
        }
    }

    fn write(self, out: &mut crate::byte_vec::ByteVector, symbols: &SymbolTable) {
        out.put_u8(self.item_tag());
        match self {
            VerificationType::Object(type_index) => {
                let entry = symbols.type_table_entry(type_index);
                let class_index = match entry {
                    crate::symbol::TypeTableEntry::Normal { class_index } => *class_index,
                    _ => unreachable!("object verification type must reference a normal entry"),
                };
                out.put_u16(class_index);
            }
            VerificationType::Uninitialized(type_index) => {
                let entry = symbols.type_table_entry(type_index);
                let offset = match entry {
                    crate::symbol::TypeTableEntry::Uninitialized { offset, .. } => *offset,
                    _ => unreachable!("uninitialized verification type must reference an uninitialized entry"),
                };
                out.put_u16(offset);
            }
            _ => {}
        }
    }
}

/// Finds the most specific common supertype of two object verification
/// types. The method writer supplies the class hierarchy lookup; in its
/// absence this falls back to `java/lang/Object`, which is always a valid
/// (if imprecise) answer.
pub trait CommonSuperClass {
    fn common_super_class(&self, a: &str, b: &str) -> String;
}

/// The snapshot of locals and operand stack at a basic-block entry point,
/// used both to drive the fix-point merge across CFG edges and to emit a
/// compressed `StackMapTable` entry relative to the previous frame.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Frame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl Frame {
    pub fn new(locals: Vec<VerificationType>, stack: Vec<VerificationType>) -> Self {
        Self { locals, stack }
    }

    /// Joins `other` into `self` in place following the verification-type
    /// lattice (JVMS §4.10.1.4): equal types are kept, mismatched primitives
    /// or uninitialized markers collapse to `Top`, mismatched object types
    /// collapse to their common supertype. Returns whether `self` changed,
    /// which the fix-point loop uses to decide whether to keep iterating.
    pub fn merge(&mut self, other: &Frame, supers: &(impl CommonSuperClass + ?Sized), symbols: &mut SymbolTable) -> bool {
        let mut changed = false;

        if other.locals.len() < self.locals.len() {
            self.locals.truncate(other.locals.len());
            changed = true;
        }
        for (slot, other_slot) in self.locals.iter_mut().zip(other.locals.iter()) {
            if Self::merge_slot(slot, *other_slot, supers, symbols) {
                changed = true;
            }
        }

        debug_assert_eq!(
            self.stack.len(),
            other.stack.len(),
            "operand stack depth must be identical at every merge point (JVMS §4.10.1)"
        );
        for (slot, other_slot) in self.stack.iter_mut().zip(other.stack.iter()) {
            if Self::merge_slot(slot, *other_slot, supers, symbols) {
                changed = true;
            }
        }

        changed
    }

    fn merge_slot(
        slot: &mut VerificationType,
        other: VerificationType,
        supers: &(impl CommonSuperClass + ?Sized),
        symbols: &mut SymbolTable,
    ) -> bool {
        if *slot == other {
            return false;
        }
        let merged = match (*slot, other) {
            (VerificationType::Object(a), VerificationType::Object(b)) => {
                let (class_a, class_b) = (Self::class_name(symbols, a), Self::class_name(symbols, b));
                let common = supers.common_super_class(&class_a, &class_b);
                let index = symbols.add_type(&common).expect("interning a type never overflows");
                VerificationType::Object(index)
            }
            (VerificationType::Null, VerificationType::Object(_)) => other,
            (VerificationType::Object(_), VerificationType::Null) => *slot,
            _ => VerificationType::Top,
        };
        if merged == *slot {
            return false;
        }
        *slot = merged;
        true
    }

    fn class_name(symbols: &SymbolTable, type_index: u32) -> String {
        Self::reference_type_name(symbols, VerificationType::Object(type_index))
            .unwrap_or_else(|| String::from("java/lang/Object"))
    }

    /// Best-effort internal class name for an `Object`/`Uninitialized`
    /// verification type; `None` for every other variant. Used by the
    /// method writer to rebuild a live `Type` after resynchronizing to a
    /// merged frame (see `MethodWriter::resync_to_join`).
    pub(crate) fn reference_type_name(symbols: &SymbolTable, vt: VerificationType) -> Option<String> {
        let type_index = match vt {
            VerificationType::Object(index) | VerificationType::Uninitialized(index) => index,
            _ => return None,
        };
        let class_index = match symbols.type_table_entry(type_index) {
            crate::symbol::TypeTableEntry::Normal { class_index } => *class_index,
            crate::symbol::TypeTableEntry::Uninitialized { class_index, .. } => *class_index,
            crate::symbol::TypeTableEntry::Merged { .. } => return Some(String::from("java/lang/Object")),
        };
        Some(
            symbols
                .resolve_class_name(class_index)
                .map(str::to_string)
                .unwrap_or_else(|| String::from("java/lang/Object")),
        )
    }

    /// Writes this frame as a compressed `StackMapTable` entry relative to
    /// `previous`, choosing the most compact applicable form (JVMS §4.7.4).
    pub fn write_compressed(
        &self,
        previous: &Frame,
        offset_delta: u16,
        out: &mut crate::byte_vec::ByteVector,
        symbols: &SymbolTable,
    ) {
        let locals_diff = self.locals.len() as i32 - previous.locals.len() as i32;
        let locals_match_prefix = locals_diff >= 0
            && self.locals[..previous.locals.len().min(self.locals.len())]
                == previous.locals[..previous.locals.len().min(self.locals.len())];

        if self.stack.is_empty() && locals_diff == 0 && locals_match_prefix {
            if offset_delta <= 63 {
                out.put_u8(offset_delta as u8);
            } else {
                out.put_u8(crate::opcodes::SAME_FRAME_EXTENDED);
                out.put_u16(offset_delta);
            }
            return;
        }

        if self.stack.len() == 1 && locals_diff == 0 && locals_match_prefix {
            if offset_delta <= 63 {
                out.put_u8(crate::opcodes::SAME_LOCALS_1_STACK_ITEM_MIN + offset_delta as u8);
            } else {
                out.put_u8(crate::opcodes::SAME_LOCALS_1_STACK_ITEM_EXTENDED);
                out.put_u16(offset_delta);
            }
            self.stack[0].write(out, symbols);
            return;
        }

        if self.stack.is_empty() && locals_match_prefix && (1..=3).contains(&locals_diff) {
            out.put_u8((crate::opcodes::APPEND_FRAME_MIN as i32 - 1 + locals_diff) as u8);
            out.put_u16(offset_delta);
            for local in &self.locals[previous.locals.len()..] {
                local.write(out, symbols);
            }
            return;
        }

        if self.stack.is_empty() && (-3..0).contains(&locals_diff) {
            let chopped_prefix_matches = self.locals
                == previous.locals[..previous.locals.len() - (-locals_diff as usize)];
            if chopped_prefix_matches {
                out.put_u8((crate::opcodes::CHOP_FRAME_MAX as i32 + locals_diff) as u8);
                out.put_u16(offset_delta);
                return;
            }
        }

        out.put_u8(crate::opcodes::FULL_FRAME);
        out.put_u16(offset_delta);
        out.put_u16(self.locals.len() as u16);
        for local in &self.locals {
            local.write(out, symbols);
        }
        out.put_u16(self.stack.len() as u16);
        for item in &self.stack {
            item.write(out, symbols);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysObject;
    impl CommonSuperClass for AlwaysObject {
        fn common_super_class(&self, _a: &str, _b: &str) -> String {
            "java/lang/Object".to_string()
        }
    }

    #[test]
    fn merging_identical_frames_reports_no_change() {
        let mut symbols = SymbolTable::new();
        let frame = Frame::new(vec![VerificationType::Integer], vec![]);
        let mut copy = frame.clone();
        assert!(!copy.merge(&frame, &AlwaysObject, &mut symbols));
    }

    #[test]
    fn merging_distinct_object_types_passes_their_real_class_names_to_common_super_class() {
        struct RecordingHierarchy {
            seen: std::cell::RefCell<Vec<(String, String)>>,
        }
        impl CommonSuperClass for RecordingHierarchy {
            fn common_super_class(&self, a: &str, b: &str) -> String {
                self.seen.borrow_mut().push((a.to_string(), b.to_string()));
                "java/lang/Object".to_string()
            }
        }

        let mut symbols = SymbolTable::new();
        let string_type = symbols.add_type("java/lang/String").unwrap();
        let integer_type = symbols.add_type("java/lang/Integer").unwrap();
        let mut a = Frame::new(vec![VerificationType::Object(string_type)], vec![]);
        let b = Frame::new(vec![VerificationType::Object(integer_type)], vec![]);
        let hierarchy = RecordingHierarchy {
            seen: std::cell::RefCell::new(Vec::new()),
        };
        a.merge(&b, &hierarchy, &mut symbols);
        assert_eq!(
            hierarchy.seen.into_inner(),
            vec![(
                "java/lang/String".to_string(),
                "java/lang/Integer".to_string()
            )]
        );
    }

    #[test]
    fn merging_mismatched_primitives_collapses_to_top() {
        let mut symbols = SymbolTable::new();
        let mut a = Frame::new(vec![VerificationType::Integer], vec![]);
        let b = Frame::new(vec![VerificationType::Float], vec![]);
        assert!(a.merge(&b, &AlwaysObject, &mut symbols));
        assert_eq!(a.locals[0], VerificationType::Top);
    }

    #[test]
    fn same_frame_is_chosen_for_identical_locals_and_empty_stack() {
        let mut symbols = SymbolTable::new();
        let previous = Frame::new(vec![VerificationType::Integer], vec![]);
        let current = previous.clone();
        let mut out = crate::byte_vec::ByteVector::new();
        current.write_compressed(&previous, 5, &mut out, &symbols);
        assert_eq!(out.as_slice(), &[5]);
    }

    #[test]
    fn one_stack_item_frame_is_chosen() {
        let mut symbols = SymbolTable::new();
        let previous = Frame::new(vec![], vec![]);
        let current = Frame::new(vec![], vec![VerificationType::Integer]);
        let mut out = crate::byte_vec::ByteVector::new();
        current.write_compressed(&previous, 2, &mut out, &symbols);
        assert_eq!(
            out.as_slice(),
            &[crate::opcodes::SAME_LOCALS_1_STACK_ITEM_MIN + 2, crate::opcodes::ITEM_INTEGER]
        );
    }
}
