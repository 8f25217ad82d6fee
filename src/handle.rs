//! Method-handle payloads (`CONSTANT_MethodHandle`), the constant kind that
//! backs `invokedynamic` bootstrap method references and static `ldc`'d
//! method handles alike.

pub use crate::opcodes::ReferenceKind;

/// A method- or field-handle reference: the (owner, name, descriptor) of the
/// member being pointed to, tagged with how it's dereferenced.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Handle {
    pub kind: ReferenceKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    /// Whether `owner` is an interface type. Required to pick the right
    /// constant-pool entry shape (`Methodref` vs `InterfaceMethodref`) for
    /// `InvokeStatic`/`InvokeSpecial` handles (JVMS §5.4.3.5).
    pub is_interface: bool,
}

impl Handle {
    pub fn new(
        kind: ReferenceKind,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        is_interface: bool,
    ) -> Self {
        Self {
            kind,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            is_interface,
        }
    }

    /// Whether this handle refers to a field (`GetField`/`GetStatic`/`PutField`/`PutStatic`)
    /// rather than a method.
    pub fn is_field(&self) -> bool {
        matches!(
            self.kind,
            ReferenceKind::GetField
                | ReferenceKind::GetStatic
                | ReferenceKind::PutField
                | ReferenceKind::PutStatic
        )
    }
}
