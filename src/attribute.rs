//! Attribute name constants (JVMS §4.7) and the prototype type a caller
//! implements to emit an attribute this crate doesn't know about natively.

use crate::byte_vec::ByteVector;
use crate::error::KapiResult;
use crate::symbol::SymbolTable;

pub const CONSTANT_VALUE: &str = "ConstantValue";
pub const CODE: &str = "Code";
pub const STACK_MAP_TABLE: &str = "StackMapTable";
pub const EXCEPTIONS: &str = "Exceptions";
pub const INNER_CLASSES: &str = "InnerClasses";
pub const ENCLOSING_METHOD: &str = "EnclosingMethod";
pub const SYNTHETIC: &str = "Synthetic";
pub const SIGNATURE: &str = "Signature";
pub const SOURCE_FILE: &str = "SourceFile";
pub const SOURCE_DEBUG_EXTENSION: &str = "SourceDebugExtension";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const DEPRECATED: &str = "Deprecated";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub const RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeVisibleParameterAnnotations";
pub const RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeInvisibleParameterAnnotations";
pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
pub const ANNOTATION_DEFAULT: &str = "AnnotationDefault";
pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
pub const METHOD_PARAMETERS: &str = "MethodParameters";
pub const MODULE: &str = "Module";
pub const MODULE_PACKAGES: &str = "ModulePackages";
pub const MODULE_MAIN_CLASS: &str = "ModuleMainClass";
pub const NEST_HOST: &str = "NestHost";
pub const NEST_MEMBERS: &str = "NestMembers";
pub const PERMITTED_SUBCLASSES: &str = "PermittedSubclasses";
pub const RECORD: &str = "Record";

/// A reference type to a nested/annotated type (JVMS §4.7.20.1), addressed by
/// sort (class type parameter, method formal parameter, cast, etc.) and an
/// index/bound index as applicable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TypeReference {
    pub sort: u8,
    pub index: u16,
}

impl TypeReference {
    pub const CLASS_TYPE_PARAMETER: u8 = 0x00;
    pub const METHOD_TYPE_PARAMETER: u8 = 0x01;
    pub const CLASS_EXTENDS: u8 = 0x10;
    pub const METHOD_FORMAL_PARAMETER: u8 = 0x16;
    pub const THROWS: u8 = 0x17;
    pub const LOCAL_VARIABLE: u8 = 0x40;
    pub const EXCEPTION_PARAMETER: u8 = 0x42;
    pub const INSTANCEOF: u8 = 0x43;
    pub const NEW: u8 = 0x44;
    pub const CAST: u8 = 0x47;

    pub fn value(self) -> u32 {
        (self.sort as u32) << 24 | (self.index as u32) << 8
    }
}

/// A single step in a type path (JVMS §4.7.20.2): array dimension, nested
/// type, wildcard bound, or type-argument index.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TypePathStep {
    pub kind: u8,
    pub argument_index: u8,
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct TypePath {
    pub steps: Vec<TypePathStep>,
}

impl TypePath {
    pub fn write(&self, out: &mut ByteVector) {
        out.put_u8(self.steps.len() as u8);
        for step in &self.steps {
            out.put_u8(step.kind).put_u8(step.argument_index);
        }
    }
}

/// Implemented by callers who need to emit an attribute this crate has no
/// first-class writer for. The content is built as an opaque blob; the
/// attribute name and length prefix are written by the owning writer.
pub trait Attribute {
    fn name(&self) -> &str;

    fn write_content(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()>;

    /// Whether this attribute may only be attached to a `Code` attribute
    /// (e.g. a custom stack-map-like attribute that needs label offsets).
    fn is_code_attribute(&self) -> bool {
        false
    }
}

pub fn write_attribute(
    attribute: &dyn Attribute,
    symbols: &mut SymbolTable,
    out: &mut ByteVector,
) -> KapiResult<()> {
    let name_index = symbols.add_utf8(attribute.name())?;
    out.put_u16(name_index);
    let length_offset = out.len();
    out.put_u32(0);
    let start = out.len();
    attribute.write_content(symbols, out)?;
    out.patch_u32(length_offset, (out.len() - start) as u32);
    Ok(())
}
