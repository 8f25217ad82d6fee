//! Annotation value trees (JVMS §4.7.16) shared by
//! `RuntimeVisibleAnnotations`, `AnnotationDefault`, and the two parameter-
//! annotation attributes.

use crate::byte_vec::ByteVector;
use crate::error::KapiResult;
use crate::symbol::SymbolTable;

/// One `element_value` structure. Primitive constants carry the constant
/// pool tag implicitly via `SymbolTable::add_*`; the variant name mirrors the
/// JVMS `tag` byte (`B`, `C`, `D`, ... `@`, `[`, `e`, `c`, `s`).
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Byte(i32),
    Char(i32),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i32),
    Boolean(bool),
    String(String),
    Enum { type_name: String, const_name: String },
    Class(String),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    fn tag(&self) -> u8 {
        match self {
            ElementValue::Byte(_) => b'B',
            ElementValue::Char(_) => b'C',
            ElementValue::Double(_) => b'D',
            ElementValue::Float(_) => b'F',
            ElementValue::Int(_) => b'I',
            ElementValue::Long(_) => b'J',
            ElementValue::Short(_) => b'S',
            ElementValue::Boolean(_) => b'Z',
            ElementValue::String(_) => b's',
            ElementValue::Enum { .. } => b'e',
            ElementValue::Class(_) => b'c',
            ElementValue::Annotation(_) => b'@',
            ElementValue::Array(_) => b'[',
        }
    }

    pub(crate) fn write(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u8(self.tag());
        match self {
            ElementValue::Byte(value)
            | ElementValue::Char(value)
            | ElementValue::Int(value)
            | ElementValue::Short(value) => {
                out.put_u16(symbols.add_integer(*value)?);
            }
            ElementValue::Boolean(value) => {
                out.put_u16(symbols.add_integer(*value as i32)?);
            }
            ElementValue::Double(value) => {
                out.put_u16(symbols.add_double(*value)?);
            }
            ElementValue::Float(value) => {
                out.put_u16(symbols.add_float(*value)?);
            }
            ElementValue::Long(value) => {
                out.put_u16(symbols.add_long(*value)?);
            }
            ElementValue::String(value) => {
                out.put_u16(symbols.add_utf8(value.as_str())?);
            }
            ElementValue::Enum {
                type_name,
                const_name,
            } => {
                out.put_u16(symbols.add_utf8(type_name.as_str())?);
                out.put_u16(symbols.add_utf8(const_name.as_str())?);
            }
            ElementValue::Class(descriptor) => {
                out.put_u16(symbols.add_utf8(descriptor.as_str())?);
            }
            ElementValue::Annotation(annotation) => {
                annotation.write(symbols, out)?;
            }
            ElementValue::Array(values) => {
                out.put_u16(values.len() as u16);
                for value in values {
                    value.write(symbols, out)?;
                }
            }
        }
        Ok(())
    }
}

/// A complete `annotation` structure: a type descriptor and its
/// name/value element pairs, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    pub type_descriptor: String,
    pub elements: Vec<(String, ElementValue)>,
}

impl Annotation {
    pub fn new(type_descriptor: impl Into<String>) -> Self {
        Self {
            type_descriptor: type_descriptor.into(),
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, name: impl Into<String>, value: ElementValue) -> Self {
        self.elements.push((name.into(), value));
        self
    }

    pub fn write(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u16(symbols.add_utf8(self.type_descriptor.as_str())?);
        out.put_u16(self.elements.len() as u16);
        for (name, value) in &self.elements {
            out.put_u16(symbols.add_utf8(name.as_str())?);
            value.write(symbols, out)?;
        }
        Ok(())
    }
}

/// Accumulates the annotations destined for one of the four
/// `RuntimeVisible(Parameter)?Annotations` / `RuntimeInvisible(Parameter)?Annotations`
/// attributes sharing a writer target.
#[derive(Debug, Default)]
pub struct AnnotationListWriter {
    annotations: Vec<Annotation>,
}

impl AnnotationListWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn write_content(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()> {
        out.put_u16(self.annotations.len() as u16);
        for annotation in &self.annotations {
            annotation.write(symbols, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_annotation_with_mixed_element_kinds() {
        let mut symbols = SymbolTable::new();
        let annotation = Annotation::new("Lpkg/Ann;")
            .with_element("value", ElementValue::Int(7))
            .with_element(
                "kind",
                ElementValue::Enum {
                    type_name: "Lpkg/Kind;".to_string(),
                    const_name: "A".to_string(),
                },
            );
        let mut out = ByteVector::new();
        annotation.write(&mut symbols, &mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn list_writer_reports_emptiness() {
        let mut list = AnnotationListWriter::new();
        assert!(list.is_empty());
        list.visit_annotation(Annotation::new("Lpkg/Ann;"));
        assert!(!list.is_empty());
    }
}
