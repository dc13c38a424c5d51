//! Runtime configuration parsing.
//!
//! A [`RuntimeConfig`] selects the layout rules, the pointer comparison mode
//! and where callback diagnostics go. A [`LayoutFile`] describes records for
//! the command-line layout tool.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::call::DiagnosticSink;
use crate::ctype::CType;
use crate::ctype::registry::{
    complete_struct_or_union, new_array_type, new_pointer_type, new_primitive_type,
    new_struct_type, new_union_type,
};
use crate::error::{Error, Result};
use crate::layout::{AbiProfile, BitfieldRule, Endian, FieldSpec, StructFlags};

/// Backend configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub layout: LayoutConfig,
    pub compare: CompareConfig,
    pub callbacks: CallbackConfig,
}

/// Layout rule selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub bitfields: BitfieldSetting,
    pub endian: EndianSetting,
    /// Default maximum member alignment.
    pub pack: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BitfieldSetting {
    #[default]
    Native,
    GccX86,
    GccArm,
    Msvc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndianSetting {
    #[default]
    Native,
    Little,
    Big,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompareConfig {
    /// Ordering two pointers of different types is a TypeError.
    pub strict_pointers: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallbackConfig {
    pub diagnostics: DiagnosticsSetting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticsSetting {
    #[default]
    Stderr,
    Log,
    Silent,
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_str(&read_file(path.as_ref())?)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.layout.pack.is_some_and(|p| !p.is_power_of_two()) {
            return Err(Error::Config(
                "layout.pack must be a power of two".to_string(),
            ));
        }
        Ok(config)
    }

    /// The layout rules, with `native` settings resolved for the host.
    pub fn profile(&self) -> AbiProfile {
        let native = AbiProfile::native();
        AbiProfile {
            bitfields: match self.layout.bitfields {
                BitfieldSetting::Native => native.bitfields,
                BitfieldSetting::GccX86 => BitfieldRule::GccX86,
                BitfieldSetting::GccArm => BitfieldRule::GccArm,
                BitfieldSetting::Msvc => BitfieldRule::Msvc,
            },
            endian: match self.layout.endian {
                EndianSetting::Native => native.endian,
                EndianSetting::Little => Endian::Little,
                EndianSetting::Big => Endian::Big,
            },
            pack: self.layout.pack,
        }
    }

    pub fn sink(&self) -> DiagnosticSink {
        match self.callbacks.diagnostics {
            DiagnosticsSetting::Stderr => DiagnosticSink::Stderr,
            DiagnosticsSetting::Log => DiagnosticSink::Log,
            DiagnosticsSetting::Silent => DiagnosticSink::Silent,
        }
    }
}

/// Record declarations for the layout tool.
///
/// ```toml
/// [[record]]
/// name = "struct node"
///
/// [[record.field]]
/// name = "next"
/// type = "struct node"
/// pointer = true
///
/// [[record.field]]
/// name = "flags"
/// type = "unsigned int"
/// bits = 3
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutFile {
    #[serde(default, rename = "record")]
    pub records: Vec<RecordDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordDecl {
    /// Full C name, `"struct foo"` or `"union bar"`.
    pub name: String,
    #[serde(default)]
    pub union: bool,
    #[serde(default)]
    pub packed: bool,
    pub pack: Option<usize>,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDecl {
    pub name: String,
    /// A primitive name or the name of a record declared in the same file.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub pointer: bool,
    /// Makes the member an array; negative for an open length.
    pub length: Option<i64>,
    pub bits: Option<u32>,
}

impl LayoutFile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_str(&read_file(path.as_ref())?)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Declare every record, then complete them in file order.
    pub fn build(&self, profile: &AbiProfile) -> Result<Vec<CType>> {
        let mut declared: HashMap<&str, CType> = HashMap::new();
        let mut records = Vec::with_capacity(self.records.len());
        for decl in &self.records {
            let ct = if decl.union {
                new_union_type(&decl.name)
            } else {
                new_struct_type(&decl.name)
            };
            if declared.insert(decl.name.as_str(), ct.clone()).is_some() {
                return Err(Error::Config(format!(
                    "record '{}' is declared twice",
                    decl.name
                )));
            }
            records.push(ct);
        }
        for (decl, ct) in self.records.iter().zip(&records) {
            let fields = decl
                .fields
                .iter()
                .map(|f| field_spec(f, &declared))
                .collect::<Result<Vec<_>>>()?;
            let sflags = if decl.packed {
                StructFlags::PACKED
            } else {
                StructFlags::empty()
            };
            complete_struct_or_union(ct, &fields, None, None, sflags, decl.pack, profile)?;
        }
        Ok(records)
    }
}

fn field_spec(decl: &FieldDecl, declared: &HashMap<&str, CType>) -> Result<FieldSpec> {
    let mut ct = match declared.get(decl.ty.as_str()) {
        Some(record) => record.clone(),
        None => new_primitive_type(&decl.ty)?,
    };
    if decl.pointer {
        ct = new_pointer_type(&ct);
    }
    if let Some(length) = decl.length {
        ct = new_array_type(&new_pointer_type(&ct), (length >= 0).then_some(length))?;
    }
    let spec = FieldSpec::new(&decl.name, &ct);
    Ok(match decl.bits {
        Some(bits) => spec.bits(bits),
        None => spec,
    })
}
