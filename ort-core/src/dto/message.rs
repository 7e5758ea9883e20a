//! Message envelope

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata sent along with every payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub token: String,
    pub trace_id: String,
    pub ort_run_id: i64,
    /// Hints for the transport of follow-up messages, e.g. resource limits
    #[serde(default)]
    pub transport_properties: HashMap<String, String>,
}

impl MessageHeader {
    pub fn new(ort_run_id: i64, trace_id: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            trace_id: trace_id.into(),
            ort_run_id,
            transport_properties: HashMap::new(),
        }
    }
}

/// A typed payload plus its header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T> {
    pub header: MessageHeader,
    pub payload: T,
}

impl<T> Message<T> {
    pub fn new(header: MessageHeader, payload: T) -> Self {
        Self { header, payload }
    }
}
