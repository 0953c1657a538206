pub mod source;
pub mod text;

use anyhow::Result;
use prost_reflect::{
    DescriptorPool, EnumDescriptor, EnumValueDescriptor, ExtensionDescriptor, FieldDescriptor,
    Kind, MessageDescriptor, MethodDescriptor, OneofDescriptor, ServiceDescriptor,
};
use prost_types::field_descriptor_proto::Type;
use reflectrpc_base::error::ReflectRpcError;

pub use source::DescriptorSource;

/// Any named element of a descriptor pool.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Message(MessageDescriptor),
    Field(FieldDescriptor),
    Oneof(OneofDescriptor),
    Enum(EnumDescriptor),
    EnumValue(EnumValueDescriptor),
    Extension(ExtensionDescriptor),
}

/// What a resolved symbol is, as reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Message,
    MapEntry,
    GroupType,
    Field,
    GroupField,
    Extension,
    Oneof,
    Enum,
    EnumValue,
    Service,
    Method,
}

impl DescriptorKind {
    pub fn label(&self) -> &'static str {
        match self {
            DescriptorKind::Message => "a message",
            DescriptorKind::MapEntry => "the entry type for a map field",
            DescriptorKind::GroupType => "the type of a group field",
            DescriptorKind::Field => "a field",
            DescriptorKind::GroupField => "a group field",
            DescriptorKind::Extension => "an extension",
            DescriptorKind::Oneof => "a one-of",
            DescriptorKind::Enum => "an enum",
            DescriptorKind::EnumValue => "an enum value",
            DescriptorKind::Service => "a service",
            DescriptorKind::Method => "a method",
        }
    }
}

impl Descriptor {
    /// Fully-qualified name without a leading dot.
    ///
    /// Enum values are named inside their enum (`pkg.Enum.VALUE`) even though
    /// protobuf scopes them as siblings of the enum.
    pub fn full_name(&self) -> String {
        match self {
            Descriptor::Service(d) => d.full_name().to_string(),
            Descriptor::Method(d) => d.full_name().to_string(),
            Descriptor::Message(d) => d.full_name().to_string(),
            Descriptor::Field(d) => d.full_name().to_string(),
            Descriptor::Oneof(d) => d.full_name().to_string(),
            Descriptor::Enum(d) => d.full_name().to_string(),
            Descriptor::EnumValue(d) => format!("{}.{}", d.parent_enum().full_name(), d.name()),
            Descriptor::Extension(d) => d.full_name().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Descriptor::Service(d) => d.name(),
            Descriptor::Method(d) => d.name(),
            Descriptor::Message(d) => d.name(),
            Descriptor::Field(d) => d.name(),
            Descriptor::Oneof(d) => d.name(),
            Descriptor::Enum(d) => d.name(),
            Descriptor::EnumValue(d) => d.name(),
            Descriptor::Extension(d) => d.name(),
        }
    }

    /// Enclosing element, `None` for file-level elements.
    pub fn parent(&self) -> Option<Descriptor> {
        match self {
            Descriptor::Service(_) => None,
            Descriptor::Method(d) => Some(Descriptor::Service(d.parent_service().clone())),
            Descriptor::Message(d) => d.parent_message().map(Descriptor::Message),
            Descriptor::Field(d) => Some(Descriptor::Message(d.parent_message().clone())),
            Descriptor::Oneof(d) => Some(Descriptor::Message(d.parent_message().clone())),
            Descriptor::Enum(d) => d.parent_message().map(Descriptor::Message),
            Descriptor::EnumValue(d) => Some(Descriptor::Enum(d.parent_enum().clone())),
            Descriptor::Extension(d) => d.parent_message().map(Descriptor::Message),
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::Message(d) => {
                if d.is_map_entry() {
                    DescriptorKind::MapEntry
                } else if owning_group_field(d).is_some() {
                    DescriptorKind::GroupType
                } else {
                    DescriptorKind::Message
                }
            }
            Descriptor::Field(d) if d.is_group() => DescriptorKind::GroupField,
            Descriptor::Field(_) => DescriptorKind::Field,
            Descriptor::Extension(d) if d.field_descriptor_proto().r#type() == Type::Group => {
                DescriptorKind::GroupField
            }
            Descriptor::Extension(_) => DescriptorKind::Extension,
            Descriptor::Oneof(_) => DescriptorKind::Oneof,
            Descriptor::Enum(_) => DescriptorKind::Enum,
            Descriptor::EnumValue(_) => DescriptorKind::EnumValue,
            Descriptor::Service(_) => DescriptorKind::Service,
            Descriptor::Method(_) => DescriptorKind::Method,
        }
    }

    /// The descriptor whose text describes this symbol.
    ///
    /// Map entries and group types are synthesized messages, so they are
    /// described through the field that owns them.
    pub fn described_element(&self) -> Result<Descriptor> {
        match (self, self.kind()) {
            (Descriptor::Message(d), DescriptorKind::MapEntry) => owning_map_field(d)
                .map(Descriptor::Field)
                .ok_or_else(|| {
                    ReflectRpcError::Inconsistent(format!(
                        "map entry {} has no owning map field",
                        d.full_name()
                    ))
                    .into()
                }),
            (Descriptor::Message(d), DescriptorKind::GroupType) => owning_group_field(d)
                .map(Descriptor::Field)
                .ok_or_else(|| {
                    ReflectRpcError::Inconsistent(format!(
                        "group type {} has no owning group field",
                        d.full_name()
                    ))
                    .into()
                }),
            _ => Ok(self.clone()),
        }
    }
}

fn owning_map_field(entry: &MessageDescriptor) -> Option<FieldDescriptor> {
    let parent = entry.parent_message()?;
    let found = parent
        .fields()
        .find(|f| f.is_map() && field_message_type(f).as_ref() == Some(entry));
    found
}

fn owning_group_field(message: &MessageDescriptor) -> Option<FieldDescriptor> {
    let parent = message.parent_message()?;
    let found = parent
        .fields()
        .find(|f| f.is_group() && field_message_type(f).as_ref() == Some(message));
    found
}

fn field_message_type(field: &FieldDescriptor) -> Option<MessageDescriptor> {
    match field.kind() {
        Kind::Message(m) => Some(m),
        _ => None,
    }
}

/// Look `name` up among the descriptors already in `pool`.
///
/// `name` carries no leading dot. Besides top-level kinds this finds methods,
/// fields, oneofs and enum values by their parent's name, and enum values in
/// protobuf's sibling scope (`pkg.VALUE` for `enum pkg.Enum { VALUE = 0; }`).
pub fn find_symbol(pool: &DescriptorPool, name: &str) -> Option<Descriptor> {
    if let Some(d) = pool.get_service_by_name(name) {
        return Some(Descriptor::Service(d));
    }
    if let Some(d) = pool.get_message_by_name(name) {
        return Some(Descriptor::Message(d));
    }
    if let Some(d) = pool.get_enum_by_name(name) {
        return Some(Descriptor::Enum(d));
    }
    if let Some(d) = pool.get_extension_by_name(name) {
        return Some(Descriptor::Extension(d));
    }

    let (parent, member) = name.rsplit_once('.').unwrap_or(("", name));
    if let Some(svc) = pool.get_service_by_name(parent) {
        return svc
            .methods()
            .find(|m| m.name() == member)
            .map(Descriptor::Method);
    }
    if let Some(msg) = pool.get_message_by_name(parent) {
        if let Some(f) = msg.get_field_by_name(member) {
            return Some(Descriptor::Field(f));
        }
        if let Some(o) = msg.oneofs().find(|o| o.name() == member) {
            return Some(Descriptor::Oneof(o));
        }
    }
    if let Some(e) = pool.get_enum_by_name(parent) {
        if let Some(v) = e.get_value_by_name(member) {
            return Some(Descriptor::EnumValue(v));
        }
    }
    pool.all_enums()
        .filter(|e| scope_of(e.full_name()) == parent)
        .find_map(|e| e.get_value_by_name(member))
        .map(Descriptor::EnumValue)
}

fn scope_of(full_name: &str) -> &str {
    full_name.rsplit_once('.').map(|(scope, _)| scope).unwrap_or("")
}
