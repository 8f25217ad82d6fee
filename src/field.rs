//! `field_info` writer (JVMS §4.5): access flags, name/descriptor, and the
//! handful of attributes a field can carry (`ConstantValue`, annotations,
//! `Signature`, `Deprecated`, `Synthetic`).

use crate::access_flag::{FieldAccessFlags, WriterHints};
use crate::annotation::{Annotation, AnnotationListWriter};
use crate::attribute;
use crate::byte_vec::ByteVector;
use crate::error::KapiResult;
use crate::symbol::{Constant, SymbolTable};

pub struct FieldWriter {
    access_flags: FieldAccessFlags,
    hints: WriterHints,
    name: String,
    descriptor: String,
    constant_value: Option<Constant>,
    signature: Option<String>,
    visible_annotations: AnnotationListWriter,
    invisible_annotations: AnnotationListWriter,
}

impl FieldWriter {
    pub fn new(
        access_flags: FieldAccessFlags,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            access_flags,
            hints: WriterHints::new(),
            name: name.into(),
            descriptor: descriptor.into(),
            constant_value: None,
            signature: None,
            visible_annotations: AnnotationListWriter::new(),
            invisible_annotations: AnnotationListWriter::new(),
        }
    }

    pub fn visit_constant_value(&mut self, value: Constant) {
        self.constant_value = Some(value);
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

    pub fn write(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u16(self.access_flags.bits());
        out.put_u16(symbols.add_utf8(self.name.as_str())?);
        out.put_u16(symbols.add_utf8(self.descriptor.as_str())?);

        let mut attribute_count = 0u16;
        if self.constant_value.is_some() {
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
        out.put_u16(attribute_count);

        if let Some(constant) = &self.constant_value {
            let name_index = symbols.add_utf8(attribute::CONSTANT_VALUE)?;
            let value_index = match constant {
                Constant::Integer(v) => symbols.add_integer(*v)?,
                Constant::Float(bits) => symbols.add_float(f32::from_bits(*bits))?,
                Constant::Long(v) => symbols.add_long(*v)?,
                Constant::Double(bits) => symbols.add_double(f64::from_bits(*bits))?,
                Constant::String(utf8_index) => *utf8_index,
                other => {
                    return Err(crate::error::KapiError::invalid_argument(format!(
                        "{other:?} is not a valid ConstantValue"
                    )))
                }
            };
            out.put_u16(name_index).put_u32(2).put_u16(value_index);
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

        Ok(())
    }
}

pub(crate) fn write_annotations_attribute(
    list: &AnnotationListWriter,
    attribute_name: &str,
    symbols: &mut SymbolTable,
    out: &mut ByteVector,
) -> KapiResult<()> {
    let name_index = symbols.add_utf8(attribute_name)?;
    out.put_u16(name_index);
    let length_offset = out.len();
    out.put_u32(0);
    let start = out.len();
    list.write_content(symbols, out)?;
    out.patch_u32(length_offset, (out.len() - start) as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_constant_value_attribute_for_static_final_field() {
        let mut symbols = SymbolTable::new();
        let mut writer = FieldWriter::new(
            FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
            "MAX",
            "I",
        );
        writer.visit_constant_value(Constant::Integer(100));
        let mut out = ByteVector::new();
        writer.write(&mut symbols, &mut out).unwrap();
        assert!(!out.is_empty());
    }
}
