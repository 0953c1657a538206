//! Protobuf-source-like text for descriptors.
//!
//! Output is deterministic with two-space indentation, and every type
//! reference is fully qualified with a leading dot (`.pkg.Type`).

use super::{owning_group_field, Descriptor};
use prost_reflect::{
    Cardinality, EnumDescriptor, EnumValueDescriptor, ExtensionDescriptor, FieldDescriptor, Kind,
    MessageDescriptor, MethodDescriptor, OneofDescriptor, ServiceDescriptor, Syntax,
};
use prost_types::FieldDescriptorProto;
use std::collections::BTreeMap;

const INDENT: &str = "  ";
// field numbers are at most 2^29 - 1, ranges store an exclusive end
const MAX_RANGE_END: i32 = 536_870_912;

pub fn render(descriptor: &Descriptor) -> String {
    let mut w = TextWriter::default();
    match descriptor {
        Descriptor::Service(d) => w.service(d),
        Descriptor::Method(d) => w.line(&method_line(d)),
        Descriptor::Message(d) => w.message(d),
        Descriptor::Field(d) => w.field(d, false),
        Descriptor::Oneof(d) => w.oneof(d),
        Descriptor::Enum(d) => w.enumeration(d),
        Descriptor::EnumValue(d) => w.line(&enum_value_line(d)),
        Descriptor::Extension(d) => w.extend_block(&d.containing_message(), &[d.clone()]),
    }
    w.finish()
}

#[derive(Default)]
struct TextWriter {
    out: String,
    depth: usize,
}

impl TextWriter {
    fn finish(mut self) -> String {
        while self.out.ends_with('\n') {
            self.out.pop();
        }
        self.out
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, header: &str) {
        self.line(&format!("{} {{", header));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    fn service(&mut self, svc: &ServiceDescriptor) {
        self.open(&format!("service {}", svc.name()));
        for method in svc.methods() {
            self.line(&method_line(&method));
        }
        self.close();
    }

    fn message(&mut self, msg: &MessageDescriptor) {
        self.open(&format!("message {}", msg.name()));
        self.message_body(msg);
        self.close();
    }

    fn message_body(&mut self, msg: &MessageDescriptor) {
        let mut emitted_oneofs: Vec<OneofDescriptor> = Vec::new();
        for field in msg.fields() {
            match declared_oneof(&field) {
                Some(oneof) => {
                    if !emitted_oneofs.contains(&oneof) {
                        self.oneof(&oneof);
                        emitted_oneofs.push(oneof);
                    }
                }
                None => self.field(&field, false),
            }
        }
        for nested in msg.child_messages() {
            if nested.is_map_entry() || owning_group_field(&nested).is_some() {
                continue;
            }
            self.message(&nested);
        }
        for nested in msg.child_enums() {
            self.enumeration(&nested);
        }

        let mut by_extendee: BTreeMap<String, (MessageDescriptor, Vec<ExtensionDescriptor>)> =
            BTreeMap::new();
        for ext in msg.child_extensions() {
            let extendee = ext.containing_message();
            by_extendee
                .entry(extendee.full_name().to_string())
                .or_insert_with(|| (extendee, Vec::new()))
                .1
                .push(ext);
        }
        for (extendee, exts) in by_extendee.values() {
            self.extend_block(extendee, exts);
        }

        let proto = msg.descriptor_proto();
        let ranges: Vec<String> = proto
            .extension_range
            .iter()
            .map(|r| number_range(r.start(), r.end() - 1))
            .collect();
        if !ranges.is_empty() {
            self.line(&format!("extensions {};", ranges.join(", ")));
        }
        let reserved: Vec<String> = proto
            .reserved_range
            .iter()
            .map(|r| number_range(r.start(), r.end() - 1))
            .collect();
        self.reserved(&reserved, &proto.reserved_name);
    }

    fn reserved(&mut self, ranges: &[String], names: &[String]) {
        if !ranges.is_empty() {
            self.line(&format!("reserved {};", ranges.join(", ")));
        }
        if !names.is_empty() {
            let quoted: Vec<String> = names.iter().map(|n| quote(n)).collect();
            self.line(&format!("reserved {};", quoted.join(", ")));
        }
    }

    /// A field, or a group field with its body. `in_oneof` drops the label.
    fn field(&mut self, field: &FieldDescriptor, in_oneof: bool) {
        let in_oneof = in_oneof || declared_oneof(field).is_some();
        let proto2 = is_proto2(&field.parent_message().parent_file().syntax());
        let label = if field.is_map() || in_oneof {
            None
        } else {
            label(field.cardinality(), field.field_descriptor_proto(), proto2)
        };

        if field.is_group() {
            if let Kind::Message(group) = field.kind() {
                self.open(&prefixed(
                    label,
                    format!("group {} = {}", group.name(), field.number()),
                ));
                self.message_body(&group);
                self.close();
                return;
            }
        }

        let type_name = match field.kind() {
            Kind::Message(entry) if field.is_map() => format!(
                "map<{}, {}>",
                type_name(&entry.map_entry_key_field().kind()),
                type_name(&entry.map_entry_value_field().kind())
            ),
            kind => type_name(&kind),
        };
        self.line(&prefixed(
            label,
            format!(
                "{} {} = {}{};",
                type_name,
                field.name(),
                field.number(),
                field_options(field.field_descriptor_proto(), &field.kind())
            ),
        ));
    }

    fn extension(&mut self, ext: &ExtensionDescriptor) {
        let proto = ext.field_descriptor_proto();
        let proto2 = is_proto2(&ext.parent_file().syntax());
        let label = label(ext.cardinality(), proto, proto2);
        self.line(&prefixed(
            label,
            format!(
                "{} {} = {}{};",
                type_name(&ext.kind()),
                ext.name(),
                ext.number(),
                field_options(proto, &ext.kind())
            ),
        ));
    }

    fn extend_block(&mut self, extendee: &MessageDescriptor, exts: &[ExtensionDescriptor]) {
        self.open(&format!("extend .{}", extendee.full_name()));
        for ext in exts {
            self.extension(ext);
        }
        self.close();
    }

    fn oneof(&mut self, oneof: &OneofDescriptor) {
        self.open(&format!("oneof {}", oneof.name()));
        for field in oneof.fields() {
            self.field(&field, true);
        }
        self.close();
    }

    fn enumeration(&mut self, en: &EnumDescriptor) {
        self.open(&format!("enum {}", en.name()));
        for value in en.values() {
            self.line(&enum_value_line(&value));
        }
        let proto = en.enum_descriptor_proto();
        let ranges: Vec<String> = proto
            .reserved_range
            .iter()
            .map(|r| number_range(r.start(), r.end()))
            .collect();
        self.reserved(&ranges, &proto.reserved_name);
        self.close();
    }
}

fn method_line(method: &MethodDescriptor) -> String {
    let stream = |streaming: bool| if streaming { "stream " } else { "" };
    format!(
        "rpc {} ( {}.{} ) returns ( {}.{} );",
        method.name(),
        stream(method.is_client_streaming()),
        method.input().full_name(),
        stream(method.is_server_streaming()),
        method.output().full_name()
    )
}

fn enum_value_line(value: &EnumValueDescriptor) -> String {
    format!("{} = {};", value.name(), value.number())
}

fn is_proto2(syntax: &Syntax) -> bool {
    matches!(syntax, Syntax::Proto2)
}

fn label(
    cardinality: Cardinality,
    proto: &FieldDescriptorProto,
    proto2: bool,
) -> Option<&'static str> {
    match cardinality {
        Cardinality::Repeated => Some("repeated"),
        Cardinality::Required => Some("required"),
        Cardinality::Optional if proto2 || proto.proto3_optional() => Some("optional"),
        Cardinality::Optional => None,
    }
}

fn prefixed(label: Option<&str>, rest: String) -> String {
    match label {
        Some(label) => format!("{} {}", label, rest),
        None => rest,
    }
}

fn type_name(kind: &Kind) -> String {
    match kind {
        Kind::Double => "double".to_string(),
        Kind::Float => "float".to_string(),
        Kind::Int32 => "int32".to_string(),
        Kind::Int64 => "int64".to_string(),
        Kind::Uint32 => "uint32".to_string(),
        Kind::Uint64 => "uint64".to_string(),
        Kind::Sint32 => "sint32".to_string(),
        Kind::Sint64 => "sint64".to_string(),
        Kind::Fixed32 => "fixed32".to_string(),
        Kind::Fixed64 => "fixed64".to_string(),
        Kind::Sfixed32 => "sfixed32".to_string(),
        Kind::Sfixed64 => "sfixed64".to_string(),
        Kind::Bool => "bool".to_string(),
        Kind::String => "string".to_string(),
        Kind::Bytes => "bytes".to_string(),
        Kind::Message(m) => format!(".{}", m.full_name()),
        Kind::Enum(e) => format!(".{}", e.full_name()),
    }
}

fn field_options(proto: &FieldDescriptorProto, kind: &Kind) -> String {
    let mut options = Vec::new();
    if let Some(default) = proto.default_value.as_deref() {
        match kind {
            Kind::String | Kind::Bytes => options.push(format!("default = {}", quote(default))),
            _ => options.push(format!("default = {}", default)),
        }
    }
    if let Some(opts) = proto.options.as_ref() {
        if let Some(packed) = opts.packed {
            options.push(format!("packed = {}", packed));
        }
        if opts.deprecated == Some(true) {
            options.push("deprecated = true".to_string());
        }
    }
    if options.is_empty() {
        String::new()
    } else {
        format!(" [{}]", options.join(", "))
    }
}

fn number_range(start: i32, end_inclusive: i32) -> String {
    if start == end_inclusive {
        start.to_string()
    } else if end_inclusive >= MAX_RANGE_END - 1 {
        format!("{} to max", start)
    } else {
        format!("{} to {}", start, end_inclusive)
    }
}

/// The oneof `field` was declared in, `None` for the synthetic oneof of a
/// proto3 `optional` field.
fn declared_oneof(field: &FieldDescriptor) -> Option<OneofDescriptor> {
    if field.field_descriptor_proto().proto3_optional() {
        return None;
    }
    field.containing_oneof()
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
