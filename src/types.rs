//! JVM type descriptors: parsing, formatting, and the handful of properties
//! (slot size, sort) the method writer and frame analyzer need to reason
//! about stack/local effects without re-parsing strings on every instruction.

use crate::error::{KapiError, KapiResult};

/// The sort of a `Type`, mirroring JVMS §4.3.2's descriptor grammar plus the
/// two pseudo-sorts (`Method`, `Void` folded into `Primitive`) needed to
/// round-trip a method descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Sort {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Array,
    Object,
    Method,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Type {
    descriptor: String,
    sort: Sort,
}

impl Type {
    pub const VOID: &'static str = "V";

    fn new(descriptor: impl Into<String>, sort: Sort) -> Self {
        Self {
            descriptor: descriptor.into(),
            sort,
        }
    }

    pub fn void() -> Self {
        Self::new("V", Sort::Void)
    }

    pub fn boolean() -> Self {
        Self::new("Z", Sort::Boolean)
    }

    pub fn byte() -> Self {
        Self::new("B", Sort::Byte)
    }

    pub fn char() -> Self {
        Self::new("C", Sort::Char)
    }

    pub fn short() -> Self {
        Self::new("S", Sort::Short)
    }

    pub fn int() -> Self {
        Self::new("I", Sort::Int)
    }

    pub fn float() -> Self {
        Self::new("F", Sort::Float)
    }

    pub fn long() -> Self {
        Self::new("J", Sort::Long)
    }

    pub fn double() -> Self {
        Self::new("D", Sort::Double)
    }

    /// Builds an object type from an internal name (`java/lang/Object`, no
    /// leading `L`, no trailing `;`).
    pub fn object(internal_name: impl AsRef<str>) -> Self {
        Self::new(format!("L{};", internal_name.as_ref()), Sort::Object)
    }

    pub fn array(element: &Type) -> Self {
        Self::new(format!("[{}", element.descriptor), Sort::Array)
    }

    /// Parses a single field descriptor (e.g. `[[I`, `Ljava/lang/String;`).
    pub fn from_descriptor(descriptor: &str) -> KapiResult<Self> {
        let (ty, rest) = Self::parse_one(descriptor)?;
        if !rest.is_empty() {
            return Err(KapiError::invalid_argument(format!(
                "trailing data after type descriptor `{descriptor}`"
            )));
        }
        Ok(ty)
    }

    fn parse_one(descriptor: &str) -> KapiResult<(Self, &str)> {
        let mut chars = descriptor.char_indices();
        let (_, first) = chars
            .next()
            .ok_or_else(|| KapiError::invalid_argument("empty type descriptor"))?;

        match first {
            'V' => Ok((Self::void(), &descriptor[1..])),
            'Z' => Ok((Self::boolean(), &descriptor[1..])),
            'B' => Ok((Self::byte(), &descriptor[1..])),
            'C' => Ok((Self::char(), &descriptor[1..])),
            'S' => Ok((Self::short(), &descriptor[1..])),
            'I' => Ok((Self::int(), &descriptor[1..])),
            'F' => Ok((Self::float(), &descriptor[1..])),
            'J' => Ok((Self::long(), &descriptor[1..])),
            'D' => Ok((Self::double(), &descriptor[1..])),
            '[' => {
                let (element, rest) = Self::parse_one(&descriptor[1..])?;
                Ok((
                    Self::new(format!("[{}", element.descriptor), Sort::Array),
                    rest,
                ))
            }
            'L' => {
                let end = descriptor
                    .find(';')
                    .ok_or_else(|| KapiError::invalid_argument(format!(
                        "unterminated object type descriptor `{descriptor}`"
                    )))?;
                Ok((
                    Self::new(&descriptor[..=end], Sort::Object),
                    &descriptor[end + 1..],
                ))
            }
            other => Err(KapiError::invalid_argument(format!(
                "unknown type descriptor tag `{other}`"
            ))),
        }
    }

    /// Splits a method descriptor (`(ILjava/lang/String;)V`) into its
    /// argument types and return type.
    pub fn from_method_descriptor(descriptor: &str) -> KapiResult<(Vec<Type>, Type)> {
        let body = descriptor
            .strip_prefix('(')
            .ok_or_else(|| KapiError::invalid_argument(format!(
                "method descriptor `{descriptor}` must start with `(`"
            )))?;
        let (args_str, return_str) = body.split_once(')').ok_or_else(|| {
            KapiError::invalid_argument(format!(
                "method descriptor `{descriptor}` is missing a closing `)`"
            ))
        })?;

        let mut args = Vec::new();
        let mut rest = args_str;
        while !rest.is_empty() {
            let (ty, remainder) = Self::parse_one(rest)?;
            args.push(ty);
            rest = remainder;
        }

        let return_type = Self::from_descriptor(return_str)?;
        Ok((args, return_type))
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    /// The internal name of an object or array type (drops the `L`/`;`
    /// wrapper). Panics is avoided: returns the raw descriptor for
    /// non-reference sorts, matching ASM's `getInternalName` contract only
    /// being meaningful for `Sort::Object`.
    pub fn internal_name(&self) -> &str {
        match self.sort {
            Sort::Object => &self.descriptor[1..self.descriptor.len() - 1],
            _ => &self.descriptor,
        }
    }

    /// Number of local variable / stack slots this type occupies (1, except
    /// for the category-2 types `long` and `double`, JVMS §2.6.1).
    pub fn size(&self) -> u16 {
        match self.sort {
            Sort::Long | Sort::Double => 2,
            Sort::Void => 0,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.sort, Sort::Object | Sort::Array)
    }
}
