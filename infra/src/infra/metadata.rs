use anyhow::Result;
use base64::prelude::{Engine as _, BASE64_STANDARD, BASE64_STANDARD_NO_PAD};
use reflectrpc_base::error::ReflectRpcError;
use serde_json::Value;
use std::collections::BTreeMap;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue, KeyAndValueRef,
    MetadataMap,
};

// carried by the status itself, not repeated as trailer metadata
const STATUS_TRAILERS: [&str; 2] = ["grpc-status", "grpc-message"];

/// Metadata as key → values, keys in sorted order and values in arrival order.
/// Binary (`-bin`) values are held base64-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMultiMap(BTreeMap<String, Vec<String>>);

impl MetadataMultiMap {
    pub fn from_metadata(md: &MetadataMap) -> Self {
        let mut map = Self::default();
        for entry in md.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => {
                    let value = match value.to_str() {
                        Ok(s) => s.to_string(),
                        Err(_) => String::from_utf8_lossy(value.as_encoded_bytes()).into_owned(),
                    };
                    map.append(key.as_str(), value);
                }
                KeyAndValueRef::Binary(key, value) => {
                    let value = match value.to_bytes() {
                        Ok(bytes) => BASE64_STANDARD.encode(bytes),
                        Err(_) => String::from_utf8_lossy(value.as_encoded_bytes()).into_owned(),
                    };
                    map.append(key.as_str(), value);
                }
            }
        }
        map
    }

    pub fn append(&mut self, key: &str, value: String) {
        self.0.entry(key.to_string()).or_default().push(value);
    }

    /// Append every value of `other`, after the values already held for the same key.
    pub fn merge(&mut self, other: MetadataMultiMap) {
        for (key, values) in other.0 {
            self.0.entry(key).or_default().extend(values);
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(|v| v.as_slice())
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One value renders as a string, several as an array, none are omitted.
    pub fn to_json(&self) -> Value {
        let map = self
            .0
            .iter()
            .filter_map(|(key, values)| match values.as_slice() {
                [] => None,
                [single] => Some((key.clone(), Value::String(single.clone()))),
                many => Some((
                    key.clone(),
                    Value::Array(many.iter().cloned().map(Value::String).collect()),
                )),
            })
            .collect::<serde_json::Map<String, Value>>();
        Value::Object(map)
    }
}

/// Collects the metadata of one call.
#[derive(Debug, Default)]
pub struct MetadataCapture {
    headers: Option<MetadataMultiMap>,
    trailers: MetadataMultiMap,
}

impl MetadataCapture {
    /// Record response headers. Only the first delivery counts.
    pub fn on_headers(&mut self, md: &MetadataMap) {
        if self.headers.is_none() {
            self.headers = Some(MetadataMultiMap::from_metadata(md));
        }
    }

    /// Record trailers, appending to values captured before for the same key.
    pub fn on_trailers(&mut self, md: &MetadataMap) {
        let mut trailers = MetadataMultiMap::from_metadata(md);
        for key in STATUS_TRAILERS {
            trailers.remove(key);
        }
        self.trailers.merge(trailers);
    }

    pub fn into_parts(self) -> (MetadataMultiMap, MetadataMultiMap) {
        (self.headers.unwrap_or_default(), self.trailers)
    }
}

/// Build request metadata from `name: value` lines.
///
/// Lines split at the first `:` and both sides are trimmed. Values of `-bin`
/// keys are base64-decoded when they decode, and sent as raw bytes otherwise.
pub fn parse_header_lines<S: AsRef<str>>(lines: &[S]) -> Result<MetadataMap> {
    let mut md = MetadataMap::new();
    for line in lines {
        let line = line.as_ref();
        let (name, value) = line.split_once(':').ok_or_else(|| {
            ReflectRpcError::InvalidParameter(format!(
                "header must be in the form \"name: value\": {:?}",
                line
            ))
        })?;
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name.ends_with("-bin") {
            let key = BinaryMetadataKey::from_bytes(name.as_bytes()).map_err(|e| {
                ReflectRpcError::InvalidParameter(format!("invalid header name {:?}: {}", name, e))
            })?;
            let bytes = BASE64_STANDARD
                .decode(value)
                .or_else(|_| BASE64_STANDARD_NO_PAD.decode(value))
                .unwrap_or_else(|_| value.as_bytes().to_vec());
            md.append_bin(key, BinaryMetadataValue::from_bytes(&bytes));
        } else {
            let key = AsciiMetadataKey::from_bytes(name.as_bytes()).map_err(|e| {
                ReflectRpcError::InvalidParameter(format!("invalid header name {:?}: {}", name, e))
            })?;
            let value = value.parse::<AsciiMetadataValue>().map_err(|e| {
                ReflectRpcError::InvalidParameter(format!(
                    "invalid value for header {:?}: {}",
                    name, e
                ))
            })?;
            md.append(key, value);
        }
    }
    Ok(md)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_header_lines() {
        let md = parse_header_lines(&[
            "Authorization: Bearer abc",
            "x-trace:  one:two ",
            "x-trace: three",
        ])
        .unwrap();
        assert_eq!(
            md.get("authorization").unwrap().to_str().unwrap(),
            "Bearer abc"
        );
        let traces: Vec<_> = md
            .get_all("x-trace")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(traces, vec!["one:two", "three"]);
    }

    #[test]
    fn test_parse_binary_header() {
        let md = parse_header_lines(&["token-bin: aGVsbG8=", "raw-bin: not base64!"]).unwrap();
        assert_eq!(
            md.get_bin("token-bin").unwrap().to_bytes().unwrap().as_ref(),
            b"hello"
        );
        assert_eq!(
            md.get_bin("raw-bin").unwrap().to_bytes().unwrap().as_ref(),
            b"not base64!"
        );
        // rendered back as base64
        let map = MetadataMultiMap::from_metadata(&md);
        assert_eq!(map.get("token-bin").unwrap(), ["aGVsbG8="]);
    }

    #[test]
    fn test_parse_header_without_colon() {
        let err = parse_header_lines(&["no-colon-here"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReflectRpcError>(),
            Some(ReflectRpcError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_metadata_to_json() {
        let mut map = MetadataMultiMap::default();
        map.append("x-one", "1".to_string());
        map.append("x-many", "a".to_string());
        map.append("x-many", "b".to_string());
        assert_eq!(map.to_json(), json!({"x-one": "1", "x-many": ["a", "b"]}));
        assert_eq!(MetadataMultiMap::default().to_json(), json!({}));
    }

    #[test]
    fn test_capture_headers_once_and_append_trailers() {
        let first = parse_header_lines(&["x-h: first"]).unwrap();
        let second = parse_header_lines(&["x-h: second"]).unwrap();
        let t1 = parse_header_lines(&["x-t: a", "grpc-status: 0", "grpc-message: ok"]).unwrap();
        let t2 = parse_header_lines(&["x-t: b", "x-u: c"]).unwrap();

        let mut capture = MetadataCapture::default();
        capture.on_headers(&first);
        capture.on_headers(&second);
        capture.on_trailers(&t1);
        capture.on_trailers(&t2);
        let (headers, trailers) = capture.into_parts();

        assert_eq!(headers.get("x-h").unwrap(), ["first"]);
        assert_eq!(trailers.get("x-t").unwrap(), ["a", "b"]);
        assert_eq!(trailers.get("x-u").unwrap(), ["c"]);
        assert!(trailers.get("grpc-status").is_none());
        assert!(trailers.get("grpc-message").is_none());
    }
}
