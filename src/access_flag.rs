//! Access-flag bitsets for every JVMS structure that carries one, plus a
//! handful of writer-only hints that look like access flags but aren't part
//! of the wire format (see `WriterHints`).

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ParameterAccessFlags: u16 {
        const FINAL = 0x0010;
        const SYNTHETIC = 0x1000;
        const MANDATED = 0x8000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct NestedClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ModuleAccessFlags: u16 {
        const OPEN = 0x0020;
        const SYNTHETIC = 0x1000;
        const MANDATED = 0x8000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RequiresAccessFlags: u16 {
        const TRANSITIVE = 0x0020;
        const STATIC_PHASE = 0x0040;
        const SYNTHETIC = 0x1000;
        const MANDATED = 0x8000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ExportsAccessFlags: u16 {
        const SYNTHETIC = 0x1000;
        const MANDATED = 0x8000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct OpensAccessFlags: u16 {
        const SYNTHETIC = 0x1000;
        const MANDATED = 0x8000;
    }
}

/// Markers that ride alongside an access-flag set but never appear as an
/// `ACC_*` bit on the wire: whether to also emit a `Deprecated` attribute, and
/// whether `ACC_SYNTHETIC`/`ACC_ANNOTATION` need downgrading to a synthetic
/// marker attribute for class files older than where the flag bit was added
/// (JVMS §4.1, introduced in 49.0 / 46.0 respectively).
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct WriterHints {
    pub deprecated: bool,
}

impl WriterHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_flags_combine_with_bitor() {
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER;
        assert_eq!(flags.bits(), 0x0031);
    }

    #[test]
    fn hints_default_to_not_deprecated() {
        assert!(!WriterHints::new().deprecated);
        assert!(WriterHints::new().deprecated(true).deprecated);
    }
}
