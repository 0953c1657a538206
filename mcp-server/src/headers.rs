use serde::de::Error as _;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type HeaderMapping = BTreeMap<String, String>;

/// Headers sent with every call of the session.
///
/// Names are stored lowercased, so a later write of the same name in any
/// case replaces the earlier value.
#[derive(Debug, Clone, Default)]
pub struct SessionHeaders {
    inner: Arc<RwLock<HeaderMapping>>,
}

impl SessionHeaders {
    /// Merge `headers` into the mapping (after clearing it when `clear`),
    /// returning the resulting mapping.
    pub async fn set(&self, headers: HeaderMapping, clear: bool) -> HeaderMapping {
        let mut current = self.inner.write().await;
        if clear {
            current.clear();
        }
        for (name, value) in headers {
            current.insert(name.to_ascii_lowercase(), value);
        }
        current.clone()
    }

    pub async fn snapshot(&self) -> HeaderMapping {
        self.inner.read().await.clone()
    }
}

/// Parse a JSON object of string values, lowercasing the names.
///
/// Names that only differ in case are rejected.
pub fn parse_headers_json(json: &str) -> Result<HeaderMapping, serde_json::Error> {
    let parsed: HeaderMapping = serde_json::from_str(json)?;
    let mut headers = HeaderMapping::new();
    for (name, value) in parsed {
        let lowered = name.to_ascii_lowercase();
        if headers.contains_key(&lowered) {
            return Err(serde_json::Error::custom(format!(
                "duplicate header name {:?} after lowercasing",
                lowered
            )));
        }
        headers.insert(lowered, value);
    }
    Ok(headers)
}

/// `name: value` lines for one call: session headers first, then per-call ones.
///
/// A name present in both is sent twice.
pub fn call_header_lines(global: &HeaderMapping, per_call: &HeaderMapping) -> Vec<String> {
    global
        .iter()
        .chain(per_call.iter())
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect()
}
