//! The constant-pool interner.
//!
//! Every sub-writer that needs a constant-pool entry goes through
//! `SymbolTable::put_*`: entries are structurally deduped (two `add_method_ref`
//! calls for the same owner/name/descriptor return the same index), indices
//! are assigned in visitation order, and wide constants (`Long`/`Double`)
//! correctly consume two pool slots (JVMS §4.4.5).
//!
//! The table also owns two writer-private tables that never appear directly
//! in the constant pool: the `BootstrapMethods` attribute entries (deduped the
//! same way) and the type table used by the frame analyzer to give merged /
//! uninitialized verification types a stable identity across a class file.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::byte_vec::ByteVector;
use crate::error::{KapiError, KapiResult};
use crate::handle::Handle;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

impl Eq for Constant {}

impl std::hash::Hash for Constant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Utf8(s) => s.hash(state),
            Constant::Integer(v) => v.hash(state),
            Constant::Float(v) => v.hash(state),
            Constant::Long(v) => v.hash(state),
            Constant::Double(v) => v.hash(state),
            Constant::Class(v) | Constant::String(v) | Constant::MethodType(v) => v.hash(state),
            Constant::Module(v) | Constant::Package(v) => v.hash(state),
            Constant::FieldRef(a, b)
            | Constant::MethodRef(a, b)
            | Constant::InterfaceMethodRef(a, b)
            | Constant::NameAndType(a, b)
            | Constant::Dynamic(a, b)
            | Constant::InvokeDynamic(a, b) => {
                a.hash(state);
                b.hash(state);
            }
            Constant::MethodHandle(a, b) => {
                a.hash(state);
                b.hash(state);
            }
        }
    }
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(..) => 1,
            Constant::Integer(..) => 3,
            Constant::Float(..) => 4,
            Constant::Long(..) => 5,
            Constant::Double(..) => 6,
            Constant::Class(..) => 7,
            Constant::String(..) => 8,
            Constant::FieldRef(..) => 9,
            Constant::MethodRef(..) => 10,
            Constant::InterfaceMethodRef(..) => 11,
            Constant::NameAndType(..) => 12,
            Constant::MethodHandle(..) => 15,
            Constant::MethodType(..) => 16,
            Constant::Dynamic(..) => 17,
            Constant::InvokeDynamic(..) => 18,
            Constant::Module(..) => 19,
            Constant::Package(..) => 20,
        }
    }

    /// Number of constant-pool slots this entry occupies. `Long`/`Double`
    /// entries burn the index that would otherwise follow them (JVMS §4.4.5).
    pub fn width(&self) -> u16 {
        match self {
            Constant::Long(..) | Constant::Double(..) => 2,
            _ => 1,
        }
    }

    fn write(&self, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u8(self.tag());
        match self {
            Constant::Utf8(value) => {
                out.put_utf8(value)?;
            }
            Constant::Integer(value) => {
                out.put_u32(*value as u32);
            }
            Constant::Float(bits) => {
                out.put_u32(*bits);
            }
            Constant::Long(value) => {
                out.put_u64(*value as u64);
            }
            Constant::Double(bits) => {
                out.put_u64(*bits);
            }
            Constant::Class(index) | Constant::String(index) | Constant::MethodType(index) => {
                out.put_u16(*index);
            }
            Constant::Module(index) | Constant::Package(index) => {
                out.put_u16(*index);
            }
            Constant::FieldRef(a, b)
            | Constant::MethodRef(a, b)
            | Constant::InterfaceMethodRef(a, b)
            | Constant::NameAndType(a, b)
            | Constant::Dynamic(a, b)
            | Constant::InvokeDynamic(a, b) => {
                out.put_u16(*a).put_u16(*b);
            }
            Constant::MethodHandle(kind, index) => {
                out.put_u8(*kind).put_u16(*index);
            }
        }
        Ok(())
    }
}

/// An entry in the `BootstrapMethods` attribute: a method handle plus the
/// constant-pool indices of its static arguments (JVMS §4.7.23).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    pub handle_index: u16,
    pub argument_indices: Vec<u16>,
}

/// Writer-private entry describing a verification type that doesn't already
/// have a natural constant-pool identity: a merge of two class types, or an
/// uninitialized-new target. Mirrors the ASM type-table tags kept separate
/// from the constant pool itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTableEntry {
    Normal { class_index: u16 },
    Uninitialized { class_index: u16, offset: u16 },
    Merged { a: u32, b: u32 },
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pool: IndexMap<Constant, u16>,
    next_index: u16,
    bootstrap_methods: IndexMap<BootstrapMethod, u16>,
    type_table: Vec<TypeTableEntry>,
    type_table_index: HashMap<TypeTableEntry, u32>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            pool: IndexMap::new(),
            next_index: 1,
            bootstrap_methods: IndexMap::new(),
            type_table: Vec::new(),
            type_table_index: HashMap::new(),
        }
    }

    /// Rehydrates a table so new entries continue after an existing pool
    /// (used when a writer is seeded from an already-materialized class,
    /// e.g. a transformer that copies most constants through verbatim).
    pub fn from_existing_pool(entries: Vec<Constant>) -> KapiResult<Self> {
        let mut table = Self::new();
        for constant in entries {
            let width = constant.width();
            if table.pool.contains_key(&constant) {
                continue;
            }
            let index = table.next_index;
            if (index as u32 + width as u32) > u16::MAX as u32 {
                return Err(KapiError::ClassFormatTooLarge {
                    what: "constant pool",
                    limit: u16::MAX as u32,
                    actual: index as u32 + width as u32,
                });
            }
            table.next_index += width;
            table.pool.insert(constant, index);
        }
        Ok(table)
    }

    fn put(&mut self, constant: Constant) -> KapiResult<u16> {
        if let Some(index) = self.pool.get(&constant) {
            return Ok(*index);
        }
        let index = self.next_index;
        let width = constant.width();
        if (index as u32 + width as u32) > u16::MAX as u32 {
            return Err(KapiError::ClassFormatTooLarge {
                what: "constant pool",
                limit: u16::MAX as u32,
                actual: index as u32 + width as u32,
            });
        }
        self.next_index += width;
        self.pool.insert(constant, index);
        Ok(index)
    }

    pub fn add_utf8(&mut self, value: impl Into<String>) -> KapiResult<u16> {
        self.put(Constant::Utf8(value.into()))
    }

    pub fn add_integer(&mut self, value: i32) -> KapiResult<u16> {
        self.put(Constant::Integer(value))
    }

    pub fn add_float(&mut self, value: f32) -> KapiResult<u16> {
        self.put(Constant::Float(value.to_bits()))
    }

    pub fn add_long(&mut self, value: i64) -> KapiResult<u16> {
        self.put(Constant::Long(value))
    }

    pub fn add_double(&mut self, value: f64) -> KapiResult<u16> {
        self.put(Constant::Double(value.to_bits()))
    }

    pub fn add_class(&mut self, internal_name: &str) -> KapiResult<u16> {
        let utf8 = self.add_utf8(internal_name)?;
        self.put(Constant::Class(utf8))
    }

    pub fn add_string(&mut self, value: &str) -> KapiResult<u16> {
        let utf8 = self.add_utf8(value)?;
        self.put(Constant::String(utf8))
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> KapiResult<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.put(Constant::NameAndType(name_index, descriptor_index))
    }

    pub fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> KapiResult<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.put(Constant::FieldRef(class_index, name_and_type))
    }

    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> KapiResult<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        if is_interface {
            self.put(Constant::InterfaceMethodRef(class_index, name_and_type))
        } else {
            self.put(Constant::MethodRef(class_index, name_and_type))
        }
    }

    pub fn add_method_type(&mut self, descriptor: &str) -> KapiResult<u16> {
        let utf8 = self.add_utf8(descriptor)?;
        self.put(Constant::MethodType(utf8))
    }

    pub fn add_handle(&mut self, handle: &Handle) -> KapiResult<u16> {
        let reference_index = if handle.is_field() {
            self.add_field_ref(&handle.owner, &handle.name, &handle.descriptor)?
        } else {
            self.add_method_ref(
                &handle.owner,
                &handle.name,
                &handle.descriptor,
                handle.is_interface,
            )?
        };
        self.put(Constant::MethodHandle(handle.kind as u8, reference_index))
    }

    pub fn add_module(&mut self, name: &str) -> KapiResult<u16> {
        let utf8 = self.add_utf8(name)?;
        self.put(Constant::Module(utf8))
    }

    pub fn add_package(&mut self, internal_name: &str) -> KapiResult<u16> {
        let utf8 = self.add_utf8(internal_name)?;
        self.put(Constant::Package(utf8))
    }

    /// Adds a `CONSTANT_Dynamic` entry (a condy constant). `bootstrap_index`
    /// is the index into the `BootstrapMethods` attribute, obtained from
    /// [`Self::add_bootstrap_method`].
    pub fn add_dynamic(
        &mut self,
        bootstrap_index: u16,
        name: &str,
        descriptor: &str,
    ) -> KapiResult<u16> {
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.put(Constant::Dynamic(bootstrap_index, name_and_type))
    }

    pub fn add_invoke_dynamic(
        &mut self,
        bootstrap_index: u16,
        name: &str,
        descriptor: &str,
    ) -> KapiResult<u16> {
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.put(Constant::InvokeDynamic(bootstrap_index, name_and_type))
    }

    /// Interns a bootstrap method entry, returning its index in the
    /// `BootstrapMethods` attribute (shared across every `invokedynamic`/
    /// `Dynamic` constant with the same handle and arguments).
    pub fn add_bootstrap_method(
        &mut self,
        handle: &Handle,
        arguments: &[Constant],
    ) -> KapiResult<u16> {
        let handle_index = self.add_handle(handle)?;
        let mut argument_indices = Vec::with_capacity(arguments.len());
        for argument in arguments {
            argument_indices.push(self.put(argument.clone())?);
        }
        let entry = BootstrapMethod {
            handle_index,
            argument_indices,
        };
        if let Some(index) = self.bootstrap_methods.get(&entry) {
            return Ok(*index);
        }
        let index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.insert(entry, index);
        Ok(index)
    }

    pub fn bootstrap_methods(&self) -> impl Iterator<Item = &BootstrapMethod> {
        self.bootstrap_methods.keys()
    }

    pub fn bootstrap_method_count(&self) -> u16 {
        self.bootstrap_methods.len() as u16
    }

    /// Interns a normal (non-merged, non-uninitialized) reference type,
    /// returning a stable type-table index for use in `StackMapTable` frames.
    pub fn add_type(&mut self, internal_name: &str) -> KapiResult<u32> {
        let class_index = self.add_class(internal_name)?;
        self.intern_type(TypeTableEntry::Normal { class_index })
    }

    pub fn add_uninitialized_type(&mut self, internal_name: &str, offset: u16) -> KapiResult<u32> {
        let class_index = self.add_class(internal_name)?;
        self.intern_type(TypeTableEntry::Uninitialized {
            class_index,
            offset,
        })
    }

    pub fn add_merged_type(&mut self, a: u32, b: u32) -> u32 {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let entry = TypeTableEntry::Merged { a: lo, b: hi };
        self.intern_type(entry).expect("merged type never overflows")
    }

    fn intern_type(&mut self, entry: TypeTableEntry) -> KapiResult<u32> {
        if let Some(index) = self.type_table_index.get(&entry) {
            return Ok(*index);
        }
        let index = self.type_table.len() as u32;
        self.type_table.push(entry.clone());
        self.type_table_index.insert(entry, index);
        Ok(index)
    }

    pub fn type_table_entry(&self, index: u32) -> &TypeTableEntry {
        &self.type_table[index as usize]
    }

    pub fn get_utf8_index(&self, value: &str) -> Option<u16> {
        self.pool.get(&Constant::Utf8(value.to_string())).copied()
    }

    /// Reverse lookup of [`Self::add_utf8`]: the string an already-interned
    /// pool index refers to, or `None` if `index` isn't a `Utf8` entry.
    /// `pool` is keyed by constant rather than index, so this scans it; only
    /// used by the frame analyzer when it needs a real class name back from
    /// a type-table entry, not on any hot emission path.
    pub fn resolve_utf8(&self, index: u16) -> Option<&str> {
        self.pool.iter().find_map(|(constant, candidate)| {
            if *candidate != index {
                return None;
            }
            match constant {
                Constant::Utf8(value) => Some(value.as_str()),
                _ => None,
            }
        })
    }

    /// Reverse lookup from a `CONSTANT_Class` pool index to the internal
    /// name it names, used to recover the real operands of a
    /// `TypeTableEntry::Normal` for a `StackMapTable` merge.
    pub fn resolve_class_name(&self, class_index: u16) -> Option<&str> {
        let name_index = self.pool.iter().find_map(|(constant, candidate)| {
            if *candidate != class_index {
                return None;
            }
            match constant {
                Constant::Class(name_index) => Some(*name_index),
                _ => None,
            }
        })?;
        self.resolve_utf8(name_index)
    }

    /// Total number of constant-pool entries counting wide entries once per
    /// slot consumed, i.e. `constant_pool_count` from JVMS §4.1.
    pub fn constant_pool_count(&self) -> u16 {
        self.next_index
    }

    pub fn write(&self, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u16(self.next_index);
        for constant in self.pool.keys() {
            constant.write(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::ReferenceKind;

    #[test]
    fn structurally_identical_constants_dedupe() {
        let mut table = SymbolTable::new();
        let a = table.add_method_ref("A", "m", "()V", false).unwrap();
        let b = table.add_method_ref("A", "m", "()V", false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wide_constants_consume_two_slots() {
        let mut table = SymbolTable::new();
        let long_index = table.add_long(42).unwrap();
        let next = table.add_integer(1).unwrap();
        assert_eq!(next, long_index + 2);
    }

    #[test]
    fn bootstrap_methods_dedupe_by_handle_and_arguments() {
        let mut table = SymbolTable::new();
        let handle = Handle::new(
            ReferenceKind::InvokeStatic,
            "Boot",
            "bootstrap",
            "(...)Ljava/lang/invoke/CallSite;",
            false,
        );
        let first = table.add_bootstrap_method(&handle, &[]).unwrap();
        let second = table.add_bootstrap_method(&handle, &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.bootstrap_method_count(), 1);
    }

    #[test]
    fn merged_type_is_order_independent() {
        let mut table = SymbolTable::new();
        let a = table.add_type("java/lang/String").unwrap();
        let b = table.add_type("java/lang/Object").unwrap();
        assert_eq!(table.add_merged_type(a, b), table.add_merged_type(b, a));
    }
}
