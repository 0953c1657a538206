use anyhow::Result;
use bytes::{Buf, BufMut, Bytes};
use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use reflectrpc_base::error::ReflectRpcError;
use tonic::codec::{BufferSettings, Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

/// Encode a JSON request (canonical protobuf JSON mapping) into wire bytes.
///
/// Blank input is the empty message. Only the first JSON document of the
/// input is used, unknown fields are rejected.
pub fn encode_json(desc: &MessageDescriptor, json: &str) -> Result<Bytes> {
    let message = json_to_message(desc, json)?;
    Ok(Bytes::from(message.encode_to_vec()))
}

pub fn json_to_message(desc: &MessageDescriptor, json: &str) -> Result<DynamicMessage> {
    let json = if json.trim().is_empty() { "{}" } else { json };
    let mut stream = serde_json::Deserializer::from_str(json).into_iter::<serde_json::Value>();
    let value = match stream.next() {
        Some(value) => value.map_err(|e| {
            ReflectRpcError::CodecError(format!("request is not valid JSON: {}", e))
        })?,
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    if stream.next().is_some() {
        tracing::warn!(
            "request for {} holds more than one JSON document, only the first is sent",
            desc.full_name()
        );
    }
    let options = DeserializeOptions::new().deny_unknown_fields(true);
    DynamicMessage::deserialize_with_options(desc.clone(), value, &options).map_err(|e| {
        ReflectRpcError::CodecError(format!(
            "cannot convert request to {}: {}",
            desc.full_name(),
            e
        ))
        .into()
    })
}

/// Decode wire bytes of `desc` into pretty-printed protobuf JSON.
pub fn decode_to_json(desc: &MessageDescriptor, bytes: &[u8]) -> Result<String> {
    let message = DynamicMessage::decode(desc.clone(), bytes).map_err(|e| {
        ReflectRpcError::CodecError(format!(
            "cannot decode response as {}: {}",
            desc.full_name(),
            e
        ))
    })?;
    message_to_json(&message)
}

pub fn message_to_json(message: &DynamicMessage) -> Result<String> {
    let options = SerializeOptions::new()
        .stringify_64_bit_integers(true)
        .use_enum_numbers(false)
        .use_proto_field_name(false)
        .skip_default_fields(true);
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::pretty(&mut buf);
    message
        .serialize_with_options(&mut serializer, &options)
        .map_err(|e| ReflectRpcError::CodecError(format!("cannot render response: {}", e)))?;
    String::from_utf8(buf)
        .map_err(|e| ReflectRpcError::CodecError(format!("response is not UTF-8: {}", e)).into())
}

/// Feeds a streaming call with exactly one request message.
#[derive(Debug)]
pub enum RequestSupplier {
    Unconsumed(Bytes),
    Consumed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Supply {
    Message(Bytes),
    EndOfInput,
}

impl RequestSupplier {
    pub fn new(encoded: Bytes) -> Self {
        RequestSupplier::Unconsumed(encoded)
    }

    pub fn supply(&mut self) -> Supply {
        match std::mem::replace(self, RequestSupplier::Consumed) {
            RequestSupplier::Unconsumed(bytes) => Supply::Message(bytes),
            RequestSupplier::Consumed => Supply::EndOfInput,
        }
    }

    /// The request stream of a call: the supplied message, then end of input.
    pub fn into_stream(self) -> impl futures::Stream<Item = Bytes> + Send + 'static {
        futures::stream::unfold(self, |mut supplier| async move {
            match supplier.supply() {
                Supply::Message(bytes) => Some((bytes, supplier)),
                Supply::EndOfInput => None,
            }
        })
    }
}

/// Pass-through codec: messages are already encoded (or are decoded later),
/// so conversion errors surface as codec errors instead of RPC statuses.
#[derive(Debug, Clone, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawEncoder;

impl Encoder for RawEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::test_server::fixtures;
    use futures::StreamExt;

    fn order_desc() -> MessageDescriptor {
        fixtures::all_fixtures_pool()
            .unwrap()
            .get_message_by_name("shop.Order")
            .unwrap()
    }

    #[test]
    fn test_encode_decode_nested_message() {
        let desc = order_desc();
        let json = r#"{
            "id": "o-1",
            "items": [{"sku": "apple", "quantity": 3}, {"sku": "pear"}],
            "attributes": {"gift": "yes"},
            "status": "SHIPPED",
            "voucher": "V10",
            "note": "",
            "totalCents": "1200"
        }"#;
        let bytes = encode_json(&desc, json).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&decode_to_json(&desc, &bytes).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "o-1",
                "items": [{"sku": "apple", "quantity": 3}, {"sku": "pear"}],
                "attributes": {"gift": "yes"},
                "status": "SHIPPED",
                "voucher": "V10",
                "note": "",
                "totalCents": "1200"
            })
        );
    }

    #[test]
    fn test_enum_by_number_decodes_by_name() {
        let desc = order_desc();
        let bytes = encode_json(&desc, r#"{"status": 1}"#).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&decode_to_json(&desc, &bytes).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"status": "PENDING"}));
    }

    #[test]
    fn test_blank_request_is_empty_message() {
        let desc = order_desc();
        assert!(encode_json(&desc, "").unwrap().is_empty());
        assert!(encode_json(&desc, "  \n").unwrap().is_empty());
        assert_eq!(decode_to_json(&desc, &[]).unwrap(), "{}");
    }

    #[test]
    fn test_only_first_document_is_used() {
        let desc = order_desc();
        let first = encode_json(&desc, r#"{"id": "a"}"#).unwrap();
        let both = encode_json(&desc, r#"{"id": "a"} {"id": "b"}"#).unwrap();
        assert_eq!(first, both);
    }

    #[test]
    fn test_encode_errors() {
        let desc = order_desc();
        for bad in [r#"{"id": "#, r#"{"nosuch": 1}"#, r#"{"status": "NOPE"}"#, "[1]"] {
            let err = encode_json(&desc, bad).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<ReflectRpcError>(),
                    Some(ReflectRpcError::CodecError(_))
                ),
                "input {}: {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        let desc = order_desc();
        let err = decode_to_json(&desc, &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReflectRpcError>(),
            Some(ReflectRpcError::CodecError(_))
        ));
    }

    #[test]
    fn test_decode_is_pretty_printed() {
        let pool = fixtures::all_fixtures_pool().unwrap();
        let desc = pool.get_message_by_name("greet.HelloReply").unwrap();
        let bytes = encode_json(&desc, r#"{"message":"hi"}"#).unwrap();
        assert_eq!(
            decode_to_json(&desc, &bytes).unwrap(),
            "{\n  \"message\": \"hi\"\n}"
        );
    }

    #[test]
    fn test_supplier_is_single_shot() {
        let mut supplier = RequestSupplier::new(Bytes::from_static(b"abc"));
        assert_eq!(
            supplier.supply(),
            Supply::Message(Bytes::from_static(b"abc"))
        );
        assert_eq!(supplier.supply(), Supply::EndOfInput);
        assert_eq!(supplier.supply(), Supply::EndOfInput);
    }

    #[tokio::test]
    async fn test_supplier_stream_yields_one_message() {
        let items: Vec<Bytes> = RequestSupplier::new(Bytes::from_static(b"x"))
            .into_stream()
            .collect()
            .await;
        assert_eq!(items, vec![Bytes::from_static(b"x")]);
    }
}
