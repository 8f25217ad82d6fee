//! `record_component_info` writer (JVMS §4.7.30), nested inside a class's
//! `Record` attribute. Shares its attribute repertoire with `FieldWriter`
//! minus `ConstantValue`, which record components never carry.

use crate::annotation::{Annotation, AnnotationListWriter};
use crate::attribute;
use crate::byte_vec::ByteVector;
use crate::error::KapiResult;
use crate::field::write_annotations_attribute;
use crate::symbol::SymbolTable;

pub struct RecordComponentWriter {
    name: String,
    descriptor: String,
    signature: Option<String>,
    visible_annotations: AnnotationListWriter,
    invisible_annotations: AnnotationListWriter,
}

impl RecordComponentWriter {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            signature: None,
            visible_annotations: AnnotationListWriter::new(),
            invisible_annotations: AnnotationListWriter::new(),
        }
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

    pub fn write(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u16(symbols.add_utf8(self.name.as_str())?);
        out.put_u16(symbols.add_utf8(self.descriptor.as_str())?);

        let mut attribute_count = 0u16;
        if self.signature.is_some() {
            attribute_count += 1;
        }
        if !self.visible_annotations.is_empty() {
            attribute_count += 1;
        }
        if !self.invisible_annotations.is_empty() {
            attribute_count += 1;
        }
        out.put_u16(attribute_count);

        if let Some(signature) = &self.signature {
            let name_index = symbols.add_utf8(attribute::SIGNATURE)?;
            let signature_index = symbols.add_utf8(signature.as_str())?;
            out.put_u16(name_index).put_u32(2).put_u16(signature_index);
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
        Ok(())
    }
}
