//! `ClassWriter`: the top-level driver that owns the shared `SymbolTable` and
//! stitches together the constant pool, field/method/record sub-writers, and
//! whole-class attributes into a complete `ClassFile` (JVMS §4.1).

use crate::access_flag::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags, ModuleAccessFlags, WriterHints};
use crate::annotation::{Annotation, AnnotationListWriter};
use crate::attribute;
use crate::byte_vec::ByteVector;
use crate::error::KapiResult;
use crate::field::{write_annotations_attribute, FieldWriter};
use crate::frame::CommonSuperClass;
use crate::method::{ComputeMode, MethodWriter};
use crate::module::ModuleAttribute;
use crate::record::RecordComponentWriter;
use crate::symbol::SymbolTable;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum JavaVersion {
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
    V1_7,
    V1_8,
    V9,
    V10,
    V11,
    V12,
    V13,
    V14,
    V15,
    V16,
    V17,
    V18,
    V19,
    V20,
    V21,
    Custom { minor: u16, major: u16 },
}

impl JavaVersion {
    pub fn major(self) -> u16 {
        match self {
            Self::V1_1 => 45,
            Self::V1_2 => 46,
            Self::V1_3 => 47,
            Self::V1_4 => 48,
            Self::V1_5 => 49,
            Self::V1_6 => 50,
            Self::V1_7 => 51,
            Self::V1_8 => 52,
            Self::V9 => 53,
            Self::V10 => 54,
            Self::V11 => 55,
            Self::V12 => 56,
            Self::V13 => 57,
            Self::V14 => 58,
            Self::V15 => 59,
            Self::V16 => 60,
            Self::V17 => 61,
            Self::V18 => 62,
            Self::V19 => 63,
            Self::V20 => 64,
            Self::V21 => 65,
            Self::Custom { major, .. } => major,
        }
    }

    pub fn minor(self) -> u16 {
        match self {
            Self::V1_1 => 3,
            Self::Custom { minor, .. } => minor,
            _ => 0,
        }
    }

    pub fn encode(self) -> u32 {
        (self.minor() as u32) << 16 | self.major() as u32
    }

    /// Whether `StackMapTable` frames are required rather than merely
    /// optional at this version (JVMS §4.10.1, introduced at 50.0).
    pub fn requires_stack_map_table(self) -> bool {
        self.major() >= 50
    }
}

impl Default for JavaVersion {
    fn default() -> Self {
        Self::V17
    }
}

struct FallbackSuperClass;

impl CommonSuperClass for FallbackSuperClass {
    /// No class hierarchy is available to a pure writer, so every merge of
    /// two distinct object types widens to `java/lang/Object`. Precise
    /// merges require the caller to supply a real hierarchy lookup by
    /// constructing `ClassWriter::with_hierarchy` instead.
    fn common_super_class(&self, _a: &str, _b: &str) -> String {
        "java/lang/Object".to_string()
    }
}

struct InnerClassEntry {
    name: String,
    outer_name: Option<String>,
    inner_name: Option<String>,
    access_flags: u16,
}

pub struct ClassWriter {
    version: JavaVersion,
    access_flags: ClassAccessFlags,
    hints: WriterHints,
    symbols: SymbolTable,
    this_class: Option<u16>,
    super_class: Option<u16>,
    interfaces: Vec<u16>,
    signature: Option<String>,
    source_file: Option<String>,
    source_debug_extension: Option<String>,
    nest_host: Option<String>,
    nest_members: Vec<String>,
    permitted_subclasses: Vec<String>,
    inner_classes: Vec<InnerClassEntry>,
    visible_annotations: AnnotationListWriter,
    invisible_annotations: AnnotationListWriter,
    fields: Vec<FieldWriter>,
    methods: Vec<MethodWriter>,
    record_components: Option<Vec<RecordComponentWriter>>,
    module: Option<ModuleAttribute>,
    supers: Box<dyn CommonSuperClass>,
}

impl ClassWriter {
    pub fn new(version: JavaVersion) -> Self {
        Self::with_hierarchy(version, Box::new(FallbackSuperClass))
    }

    /// Builds a writer that resolves `StackMapTable` merges against a real
    /// class hierarchy instead of unconditionally widening to
    /// `java/lang/Object`.
    pub fn with_hierarchy(version: JavaVersion, supers: Box<dyn CommonSuperClass>) -> Self {
        Self {
            version,
            access_flags: ClassAccessFlags::empty(),
            hints: WriterHints::new(),
            symbols: SymbolTable::new(),
            this_class: None,
            super_class: None,
            interfaces: Vec::new(),
            signature: None,
            source_file: None,
            source_debug_extension: None,
            nest_host: None,
            nest_members: Vec::new(),
            permitted_subclasses: Vec::new(),
            inner_classes: Vec::new(),
            visible_annotations: AnnotationListWriter::new(),
            invisible_annotations: AnnotationListWriter::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            record_components: None,
            module: None,
            supers,
        }
    }

    pub fn visit(
        &mut self,
        access_flags: ClassAccessFlags,
        name: &str,
        signature: Option<&str>,
        super_name: &str,
        interfaces: &[&str],
    ) -> KapiResult<()> {
        self.access_flags = access_flags;
        self.this_class = Some(self.symbols.add_class(name)?);
        self.super_class = Some(self.symbols.add_class(super_name)?);
        self.signature = signature.map(str::to_string);
        self.interfaces = interfaces
            .iter()
            .map(|interface| self.symbols.add_class(interface))
            .collect::<KapiResult<_>>()?;
        Ok(())
    }

    pub fn visit_source(&mut self, source_file: Option<&str>, debug_extension: Option<&str>) {
        self.source_file = source_file.map(str::to_string);
        self.source_debug_extension = debug_extension.map(str::to_string);
    }

    pub fn visit_nest_host(&mut self, host: impl Into<String>) {
        self.nest_host = Some(host.into());
    }

    pub fn visit_nest_member(&mut self, member: impl Into<String>) {
        self.nest_members.push(member.into());
    }

    pub fn visit_permitted_subclass(&mut self, subclass: impl Into<String>) {
        self.permitted_subclasses.push(subclass.into());
    }

    pub fn visit_inner_class(
        &mut self,
        name: impl Into<String>,
        outer_name: Option<String>,
        inner_name: Option<String>,
        access_flags: u16,
    ) {
        self.inner_classes.push(InnerClassEntry {
            name: name.into(),
            outer_name,
            inner_name,
            access_flags,
        });
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

    pub fn visit_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> &mut FieldWriter {
        self.fields.push(FieldWriter::new(access_flags, name, descriptor));
        self.fields.last_mut().unwrap()
    }

    pub fn visit_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        compute_mode: ComputeMode,
    ) -> KapiResult<&mut MethodWriter> {
        let writer = MethodWriter::new(
            self.version.encode(),
            access_flags,
            name,
            descriptor,
            compute_mode,
        )?;
        self.methods.push(writer);
        Ok(self.methods.last_mut().unwrap())
    }

    /// Starts the `Module` attribute for a `module-info` class (JVMS
    /// §4.7.25). Only meaningful when `visit`'s `access_flags` carries
    /// `ClassAccessFlags::MODULE`; the returned builder collects
    /// `requires`/`exports`/`opens`/`uses`/`provides` directives.
    pub fn visit_module(
        &mut self,
        name: impl Into<String>,
        flags: ModuleAccessFlags,
        version: Option<&str>,
    ) -> &mut ModuleAttribute {
        self.module = Some(ModuleAttribute::new(name, flags, version));
        self.module.as_mut().unwrap()
    }

    pub fn visit_record_component(
        &mut self,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> &mut RecordComponentWriter {
        self.record_components
            .get_or_insert_with(Vec::new)
            .push(RecordComponentWriter::new(name, descriptor));
        self.record_components.as_mut().unwrap().last_mut().unwrap()
    }

    /// Finalizes every sub-writer and assembles the complete class file
    /// bytes. Field and method bodies are rendered into a scratch buffer
    /// first so every constant they reference is interned before the
    /// constant pool itself is written (JVMS §4.1 requires the pool before
    /// everything that indexes into it).
    pub fn to_bytes(&mut self) -> KapiResult<Vec<u8>> {
        let this_class = self
            .this_class
            .ok_or_else(|| crate::error::KapiError::invalid_state("visit() called", "visit() never called"))?;
        let super_class = self.super_class.unwrap_or(0);

        // ACC_SYNTHETIC on a class wasn't defined until 49.0 (JVMS §4.1
        // history); older targets need the marker carried as a Synthetic
        // attribute instead of the flag bit.
        let downgrade_synthetic =
            self.access_flags.contains(ClassAccessFlags::SYNTHETIC) && self.version.major() < 49;
        if downgrade_synthetic {
            log::warn!(
                "class file version {} predates ACC_SYNTHETIC; emitting a Synthetic attribute instead",
                self.version.major()
            );
        }
        let written_access_flags = if downgrade_synthetic {
            self.access_flags - ClassAccessFlags::SYNTHETIC
        } else {
            self.access_flags
        };

        let mut fields_buf = ByteVector::new();
        fields_buf.put_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.write(&mut self.symbols, &mut fields_buf)?;
        }

        let mut methods_buf = ByteVector::new();
        methods_buf.put_u16(self.methods.len() as u16);
        for method in &mut self.methods {
            method.visit_end(&mut self.symbols, self.supers.as_ref(), &mut methods_buf)?;
        }

        let mut attributes_buf = ByteVector::new();
        let mut attribute_count = 0u16;

        if let Some(source_file) = &self.source_file {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::SOURCE_FILE)?;
            let value_index = self.symbols.add_utf8(source_file.as_str())?;
            attributes_buf.put_u16(name_index).put_u32(2).put_u16(value_index);
        }

        if let Some(debug_extension) = &self.source_debug_extension {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::SOURCE_DEBUG_EXTENSION)?;
            attributes_buf.put_u16(name_index);
            let length_offset = attributes_buf.len();
            attributes_buf.put_u32(0);
            let start = attributes_buf.len();
            attributes_buf.put_utf8(debug_extension)?;
            attributes_buf.patch_u32(length_offset, (attributes_buf.len() - start) as u32);
        }

        if let Some(signature) = &self.signature {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::SIGNATURE)?;
            let signature_index = self.symbols.add_utf8(signature.as_str())?;
            attributes_buf
                .put_u16(name_index)
                .put_u32(2)
                .put_u16(signature_index);
        }

        if self.hints.deprecated {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::DEPRECATED)?;
            attributes_buf.put_u16(name_index).put_u32(0);
        }

        if downgrade_synthetic {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::SYNTHETIC)?;
            attributes_buf.put_u16(name_index).put_u32(0);
        }

        if let Some(host) = &self.nest_host {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::NEST_HOST)?;
            let host_index = self.symbols.add_class(host)?;
            attributes_buf.put_u16(name_index).put_u32(2).put_u16(host_index);
        }

        if !self.nest_members.is_empty() {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::NEST_MEMBERS)?;
            attributes_buf.put_u16(name_index);
            attributes_buf.put_u32(2 + 2 * self.nest_members.len() as u32);
            attributes_buf.put_u16(self.nest_members.len() as u16);
            for member in &self.nest_members {
                let index = self.symbols.add_class(member)?;
                attributes_buf.put_u16(index);
            }
        }

        if !self.permitted_subclasses.is_empty() {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::PERMITTED_SUBCLASSES)?;
            attributes_buf.put_u16(name_index);
            attributes_buf.put_u32(2 + 2 * self.permitted_subclasses.len() as u32);
            attributes_buf.put_u16(self.permitted_subclasses.len() as u16);
            for subclass in &self.permitted_subclasses {
                let index = self.symbols.add_class(subclass)?;
                attributes_buf.put_u16(index);
            }
        }

        if !self.inner_classes.is_empty() {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::INNER_CLASSES)?;
            attributes_buf.put_u16(name_index);
            attributes_buf.put_u32(2 + 8 * self.inner_classes.len() as u32);
            attributes_buf.put_u16(self.inner_classes.len() as u16);
            for entry in &self.inner_classes {
                let inner_index = self.symbols.add_class(&entry.name)?;
                let outer_index = match &entry.outer_name {
                    Some(name) => self.symbols.add_class(name)?,
                    None => 0,
                };
                let name_index = match &entry.inner_name {
                    Some(name) => self.symbols.add_utf8(name.as_str())?,
                    None => 0,
                };
                attributes_buf
                    .put_u16(inner_index)
                    .put_u16(outer_index)
                    .put_u16(name_index)
                    .put_u16(entry.access_flags);
            }
        }

        if !self.visible_annotations.is_empty() {
            attribute_count += 1;
            write_annotations_attribute(
                &self.visible_annotations,
                attribute::RUNTIME_VISIBLE_ANNOTATIONS,
                &mut self.symbols,
                &mut attributes_buf,
            )?;
        }
        if !self.invisible_annotations.is_empty() {
            attribute_count += 1;
            write_annotations_attribute(
                &self.invisible_annotations,
                attribute::RUNTIME_INVISIBLE_ANNOTATIONS,
                &mut self.symbols,
                &mut attributes_buf,
            )?;
        }

        if let Some(components) = &self.record_components {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::RECORD)?;
            attributes_buf.put_u16(name_index);
            let length_offset = attributes_buf.len();
            attributes_buf.put_u32(0);
            let start = attributes_buf.len();
            attributes_buf.put_u16(components.len() as u16);
            for component in components {
                component.write(&mut self.symbols, &mut attributes_buf)?;
            }
            attributes_buf.patch_u32(length_offset, (attributes_buf.len() - start) as u32);
        }

        if let Some(module) = &self.module {
            attribute_count += 1;
            module.write(&mut self.symbols, &mut attributes_buf)?;
        }

        // BootstrapMethods must be emitted last among the attributes we
        // collect here because field/method writing above is what populates
        // it (any `invokedynamic`/condy constant interned during
        // `methods_buf` construction).
        if self.symbols.bootstrap_method_count() > 0 {
            attribute_count += 1;
            let name_index = self.symbols.add_utf8(attribute::BOOTSTRAP_METHODS)?;
            attributes_buf.put_u16(name_index);
            let length_offset = attributes_buf.len();
            attributes_buf.put_u32(0);
            let start = attributes_buf.len();
            let methods: Vec<_> = self.symbols.bootstrap_methods().cloned().collect();
            attributes_buf.put_u16(methods.len() as u16);
            for method in &methods {
                attributes_buf.put_u16(method.handle_index);
                attributes_buf.put_u16(method.argument_indices.len() as u16);
                for argument in &method.argument_indices {
                    attributes_buf.put_u16(*argument);
                }
            }
            attributes_buf.patch_u32(length_offset, (attributes_buf.len() - start) as u32);
        }

        let mut out = ByteVector::with_capacity(
            24 + 2 * self.interfaces.len() + fields_buf.len() + methods_buf.len() + attributes_buf.len(),
        );
        out.put_u32(0xCAFE_BABE);
        out.put_u32(self.version.encode());
        self.symbols.write(&mut out)?;
        out.put_u16(written_access_flags.bits());
        out.put_u16(this_class);
        out.put_u16(super_class);
        out.put_u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            out.put_u16(*interface);
        }
        out.put_bytes(fields_buf.as_slice());
        out.put_bytes(methods_buf.as_slice());
        out.put_u16(attribute_count);
        out.put_bytes(attributes_buf.as_slice());

        log::debug!(
            "finished class file ({} bytes, {} fields, {} methods)",
            out.len(),
            self.fields.len(),
            self.methods.len()
        );
        Ok(out.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ComputeMode;
    use crate::opcodes::{IRETURN, RETURN};

    #[test]
    fn empty_class_has_cafebabe_magic_and_declared_version() {
        let mut writer = ClassWriter::new(JavaVersion::V1_8);
        writer
            .visit(
                ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                "Empty",
                None,
                "java/lang/Object",
                &[],
            )
            .unwrap();
        let bytes = writer.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(&bytes[4..8], &(JavaVersion::V1_8.encode()).to_be_bytes());
    }

    #[test]
    fn static_method_round_trips_through_class_writer() {
        let mut writer = ClassWriter::new(JavaVersion::V1_8);
        writer
            .visit(
                ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                "Main",
                None,
                "java/lang/Object",
                &[],
            )
            .unwrap();
        {
            let method = writer
                .visit_method(
                    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                    "run",
                    "()V",
                    ComputeMode::MaxStackAndLocals,
                )
                .unwrap();
            method.visit_insn(RETURN).unwrap();
        }
        let bytes = writer.to_bytes().unwrap();
        assert!(!bytes.is_empty());
        let _ = IRETURN;
    }

    #[test]
    fn synthetic_class_below_version_49_downgrades_to_an_attribute() {
        let mut writer = ClassWriter::new(JavaVersion::V1_4);
        writer
            .visit(
                ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER | ClassAccessFlags::SYNTHETIC,
                "p/Generated",
                None,
                "java/lang/Object",
                &[],
            )
            .unwrap();
        let bytes = writer.to_bytes().unwrap();

        let after_pool_offset = {
            let count = u16::from_be_bytes([bytes[8], bytes[9]]);
            let mut offset = 10usize;
            let mut index = 1u16;
            while index < count {
                let tag = bytes[offset];
                let (size, width) = match tag {
                    1 => (3 + u16::from_be_bytes([bytes[offset + 1], bytes[offset + 2]]) as usize, 1),
                    3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => (5, 1),
                    5 | 6 => (9, 2),
                    7 | 8 | 16 | 19 | 20 => (3, 1),
                    15 => (4, 1),
                    other => panic!("unexpected constant pool tag {other}"),
                };
                offset += size;
                index += width;
            }
            offset
        };
        let access_flags = u16::from_be_bytes([bytes[after_pool_offset], bytes[after_pool_offset + 1]]);
        assert_eq!(access_flags & ClassAccessFlags::SYNTHETIC.bits(), 0);
    }

    #[test]
    fn module_attribute_round_trips_through_the_class_writer() {
        let mut writer = ClassWriter::new(JavaVersion::V9);
        writer
            .visit(
                ClassAccessFlags::MODULE,
                "module-info",
                None,
                "java/lang/Object",
                &[],
            )
            .unwrap();
        writer
            .visit_module("com.example.app", crate::access_flag::ModuleAccessFlags::empty(), None)
            .visit_require("java.base", crate::access_flag::RequiresAccessFlags::MANDATED, None);
        let bytes = writer.to_bytes().unwrap();
        assert!(!bytes.is_empty());
    }
}
