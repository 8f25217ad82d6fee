//! Capability-object visitor traits.
//!
//! ASM's visitor API is a chain of abstract classes a subclass overrides
//! selectively, delegating anything it doesn't care about to `super`. The
//! idiomatic Rust analogue used here is a trait per role with default
//! methods that forward to an optional inner visitor, so a transformer only
//! implements the handful of callbacks it actually cares about.

use crate::access_flag::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::annotation::Annotation;
use crate::error::KapiResult;

#[allow(unused_variables)]
pub trait ClassVisitor {
    fn inner(&mut self) -> Option<&mut dyn ClassVisitor> {
        None
    }

    /// The class's version is fixed at construction (`ClassWriter::new`),
    /// not revisited here, so this only carries what `visit()` actually
    /// mutates.
    fn visit(
        &mut self,
        access_flags: ClassAccessFlags,
        name: &str,
        signature: Option<&str>,
        super_name: &str,
        interfaces: &[&str],
    ) -> KapiResult<()> {
        if let Some(inner) = self.inner() {
            inner.visit(access_flags, name, signature, super_name, interfaces)?;
        }
        Ok(())
    }

    fn visit_source(&mut self, source_file: Option<&str>, debug_extension: Option<&str>) {
        if let Some(inner) = self.inner() {
            inner.visit_source(source_file, debug_extension);
        }
    }

    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        if let Some(inner) = self.inner() {
            inner.visit_annotation(annotation, visible);
        }
    }

    fn visit_nest_host(&mut self, host: &str) {
        if let Some(inner) = self.inner() {
            inner.visit_nest_host(host);
        }
    }

    fn visit_nest_member(&mut self, member: &str) {
        if let Some(inner) = self.inner() {
            inner.visit_nest_member(member);
        }
    }

    fn visit_permitted_subclass(&mut self, subclass: &str) {
        if let Some(inner) = self.inner() {
            inner.visit_permitted_subclass(subclass);
        }
    }

    fn visit_end(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_end();
        }
    }
}

#[allow(unused_variables)]
pub trait FieldVisitor {
    fn inner(&mut self) -> Option<&mut dyn FieldVisitor> {
        None
    }

    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        if let Some(inner) = self.inner() {
            inner.visit_annotation(annotation, visible);
        }
    }

    fn visit_end(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_end();
        }
    }
}

#[allow(unused_variables)]
pub trait MethodVisitor {
    fn inner(&mut self) -> Option<&mut dyn MethodVisitor> {
        None
    }

    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        if let Some(inner) = self.inner() {
            inner.visit_annotation(annotation, visible);
        }
    }

    fn visit_code(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_code();
        }
    }

    fn visit_end(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_end();
        }
    }
}

#[allow(unused_variables)]
pub trait RecordComponentVisitor {
    fn inner(&mut self) -> Option<&mut dyn RecordComponentVisitor> {
        None
    }

    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        if let Some(inner) = self.inner() {
            inner.visit_annotation(annotation, visible);
        }
    }

    fn visit_end(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_end();
        }
    }
}

#[allow(unused_variables)]
pub trait ModuleVisitor {
    fn inner(&mut self) -> Option<&mut dyn ModuleVisitor> {
        None
    }

    fn visit_require(&mut self, module: &str, flags: u16, version: Option<&str>) {
        if let Some(inner) = self.inner() {
            inner.visit_require(module, flags, version);
        }
    }

    fn visit_export(&mut self, package: &str, flags: u16, to: &[&str]) {
        if let Some(inner) = self.inner() {
            inner.visit_export(package, flags, to);
        }
    }

    fn visit_open(&mut self, package: &str, flags: u16, to: &[&str]) {
        if let Some(inner) = self.inner() {
            inner.visit_open(package, flags, to);
        }
    }

    fn visit_use(&mut self, service: &str) {
        if let Some(inner) = self.inner() {
            inner.visit_use(service);
        }
    }

    fn visit_provide(&mut self, service: &str, with: &[&str]) {
        if let Some(inner) = self.inner() {
            inner.visit_provide(service, with);
        }
    }

    fn visit_end(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_end();
        }
    }
}

#[allow(unused_variables)]
pub trait AnnotationVisitor {
    fn inner(&mut self) -> Option<&mut dyn AnnotationVisitor> {
        None
    }

    fn visit_end(&mut self) {
        if let Some(inner) = self.inner() {
            inner.visit_end();
        }
    }
}

/// Minimal forwarding visitor. Useful as the base of a chain that only
/// overrides a couple of callbacks, analogous to ASM's `ClassVisitor` with no
/// further subclassing.
#[derive(Debug, Default)]
pub struct NoOpClassVisitor;

impl ClassVisitor for NoOpClassVisitor {}

#[allow(unused_variables)]
pub trait AnnotationSink {
    fn visit_annotation(&mut self, annotation: Annotation, visible: bool);
}

impl ClassVisitor for crate::class::ClassWriter {
    fn visit(
        &mut self,
        access_flags: ClassAccessFlags,
        name: &str,
        signature: Option<&str>,
        super_name: &str,
        interfaces: &[&str],
    ) -> KapiResult<()> {
        crate::class::ClassWriter::visit(self, access_flags, name, signature, super_name, interfaces)
    }

    fn visit_source(&mut self, source_file: Option<&str>, debug_extension: Option<&str>) {
        crate::class::ClassWriter::visit_source(self, source_file, debug_extension)
    }

    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        crate::class::ClassWriter::visit_annotation(self, annotation, visible)
    }

    fn visit_nest_host(&mut self, host: &str) {
        crate::class::ClassWriter::visit_nest_host(self, host)
    }

    fn visit_nest_member(&mut self, member: &str) {
        crate::class::ClassWriter::visit_nest_member(self, member)
    }

    fn visit_permitted_subclass(&mut self, subclass: &str) {
        crate::class::ClassWriter::visit_permitted_subclass(self, subclass)
    }

    // `visit_end` has no inherent counterpart — finalization happens through
    // `to_bytes`, which needs the method/field writers by value, not through
    // a callback this trait's `&mut self` signature could drive. Left at the
    // default (a no-op without a chained inner visitor).
}

impl FieldVisitor for crate::field::FieldWriter {
    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        crate::field::FieldWriter::visit_annotation(self, annotation, visible)
    }
}

impl RecordComponentVisitor for crate::record::RecordComponentWriter {
    fn visit_annotation(&mut self, annotation: Annotation, visible: bool) {
        crate::record::RecordComponentWriter::visit_annotation(self, annotation, visible)
    }
}
