//! `ModuleAttribute`: the `Module` attribute (JVMS §4.7.25) attached to a
//! `module-info` class file's top-level attribute list.

use crate::access_flag::{ExportsAccessFlags, ModuleAccessFlags, OpensAccessFlags, RequiresAccessFlags};
use crate::attribute;
use crate::byte_vec::ByteVector;
use crate::error::KapiResult;
use crate::symbol::SymbolTable;

struct Requires {
    module: String,
    flags: RequiresAccessFlags,
    version: Option<String>,
}

struct Exports {
    package: String,
    flags: ExportsAccessFlags,
    to: Vec<String>,
}

struct Opens {
    package: String,
    flags: OpensAccessFlags,
    to: Vec<String>,
}

struct Provides {
    service: String,
    with: Vec<String>,
}

/// Built via `ClassWriter::visit_module`; one instance per `module-info`
/// class, describing its own identity plus every `requires`/`exports`/
/// `opens`/`uses`/`provides` directive.
pub struct ModuleAttribute {
    name: String,
    flags: ModuleAccessFlags,
    version: Option<String>,
    requires: Vec<Requires>,
    exports: Vec<Exports>,
    opens: Vec<Opens>,
    uses: Vec<String>,
    provides: Vec<Provides>,
}

impl ModuleAttribute {
    pub(crate) fn new(name: impl Into<String>, flags: ModuleAccessFlags, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            flags,
            version: version.map(str::to_string),
            requires: Vec::new(),
            exports: Vec::new(),
            opens: Vec::new(),
            uses: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn visit_require(
        &mut self,
        module: impl Into<String>,
        flags: RequiresAccessFlags,
        version: Option<&str>,
    ) -> &mut Self {
        self.requires.push(Requires {
            module: module.into(),
            flags,
            version: version.map(str::to_string),
        });
        self
    }

    pub fn visit_export(
        &mut self,
        package: impl Into<String>,
        flags: ExportsAccessFlags,
        to: &[&str],
    ) -> &mut Self {
        self.exports.push(Exports {
            package: package.into(),
            flags,
            to: to.iter().map(|name| name.to_string()).collect(),
        });
        self
    }

    pub fn visit_open(&mut self, package: impl Into<String>, flags: OpensAccessFlags, to: &[&str]) -> &mut Self {
        self.opens.push(Opens {
            package: package.into(),
            flags,
            to: to.iter().map(|name| name.to_string()).collect(),
        });
        self
    }

    pub fn visit_use(&mut self, service: impl Into<String>) -> &mut Self {
        self.uses.push(service.into());
        self
    }

    pub fn visit_provide(&mut self, service: impl Into<String>, with: &[&str]) -> &mut Self {
        self.provides.push(Provides {
            service: service.into(),
            with: with.iter().map(|name| name.to_string()).collect(),
        });
        self
    }

    pub(crate) fn write(&self, symbols: &mut SymbolTable, out: &mut ByteVector) -> KapiResult<()> {
        let attribute_name_index = symbols.add_utf8(attribute::MODULE)?;
        out.put_u16(attribute_name_index);
        let length_offset = out.len();
        out.put_u32(0);
        let start = out.len();

        let module_name_index = symbols.add_module(&self.name)?;
        let version_index = match &self.version {
            Some(version) => symbols.add_utf8(version.as_str())?,
            None => 0,
        };
        out.put_u16(module_name_index)
            .put_u16(self.flags.bits())
            .put_u16(version_index);

        out.put_u16(self.requires.len() as u16);
        for requires in &self.requires {
            let module_index = symbols.add_module(&requires.module)?;
            let version_index = match &requires.version {
                Some(version) => symbols.add_utf8(version.as_str())?,
                None => 0,
            };
            out.put_u16(module_index).put_u16(requires.flags.bits()).put_u16(version_index);
        }

        out.put_u16(self.exports.len() as u16);
        for exports in &self.exports {
            let package_index = symbols.add_package(&exports.package)?;
            out.put_u16(package_index).put_u16(exports.flags.bits());
            out.put_u16(exports.to.len() as u16);
            for to_module in &exports.to {
                let to_index = symbols.add_module(to_module)?;
                out.put_u16(to_index);
            }
        }

        out.put_u16(self.opens.len() as u16);
        for opens in &self.opens {
            let package_index = symbols.add_package(&opens.package)?;
            out.put_u16(package_index).put_u16(opens.flags.bits());
            out.put_u16(opens.to.len() as u16);
            for to_module in &opens.to {
                let to_index = symbols.add_module(to_module)?;
                out.put_u16(to_index);
            }
        }

        out.put_u16(self.uses.len() as u16);
        for service in &self.uses {
            let class_index = symbols.add_class(service)?;
            out.put_u16(class_index);
        }

        out.put_u16(self.provides.len() as u16);
        for provides in &self.provides {
            let service_index = symbols.add_class(&provides.service)?;
            out.put_u16(service_index);
            out.put_u16(provides.with.len() as u16);
            for implementation in &provides.with {
                let impl_index = symbols.add_class(implementation)?;
                out.put_u16(impl_index);
            }
        }

        out.patch_u32(length_offset, (out.len() - start) as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_exports_and_provides_round_trip_through_the_symbol_table() {
        let mut module = ModuleAttribute::new("com.example.app", ModuleAccessFlags::empty(), Some("1.0"));
        module.visit_require("java.base", RequiresAccessFlags::MANDATED, None);
        module.visit_export("com.example.app.api", ExportsAccessFlags::empty(), &[]);
        module.visit_use("com.example.app.spi.Plugin");
        module.visit_provide(
            "com.example.app.spi.Plugin",
            &["com.example.app.DefaultPlugin"],
        );

        let mut symbols = SymbolTable::new();
        let mut out = ByteVector::new();
        module.write(&mut symbols, &mut out).unwrap();

        let declared_length = u32::from_be_bytes([
            out.as_slice()[2],
            out.as_slice()[3],
            out.as_slice()[4],
            out.as_slice()[5],
        ]);
        assert_eq!(declared_length as usize, out.len() - 6);
    }
}
