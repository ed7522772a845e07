//! Shared document state.
//!
//! The document is a static specification object plus one mutable
//! `content` string. Edits replace `content` wholesale; there is no merge
//! and no history. Snapshots always reflect the latest accepted edit.

use crate::error::DocumentError;
use crate::message::json_type_name;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Key in the specification object that mirrors the edited content.
pub const CONTENT_KEY: &str = "content";

/// The collaboratively edited document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentState {
    specification: Map<String, Value>,
    content: String,
    revision: u64,
}

impl DocumentState {
    /// Create a document from a specification object.
    ///
    /// The initial content is taken from the object's `content` key when it
    /// is a string, and is empty otherwise.
    pub fn new(specification: Map<String, Value>) -> Self {
        let content = specification
            .get(CONTENT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            specification,
            content,
            revision: 0,
        }
    }

    /// Load a specification object from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Parse a specification object from JSON text.
    pub fn from_json(raw: &str) -> Result<Self, DocumentError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(DocumentError::NotAnObject(json_type_name(&other))),
        }
    }

    /// Current edited content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Number of edits applied since startup.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the content with a new value. Last writer wins.
    pub fn replace_content(&mut self, content: String) {
        self.content = content;
        self.revision += 1;
    }

    /// Full specification object with `content` set to the latest edit.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut snapshot = self.specification.clone();
        snapshot.insert(CONTENT_KEY.to_string(), Value::String(self.content.clone()));
        snapshot
    }
}

impl Default for DocumentState {
    fn default() -> Self {
        match default_specification() {
            Value::Object(map) => Self::new(map),
            _ => Self::new(Map::new()),
        }
    }
}

/// The Microscope Functional Requirements Specification served at startup.
pub fn default_specification() -> Value {
    json!({
        "purpose1": "Defines the detailed system-level functionality and behavior required for the Microscope based on the User Requirements Specification (URS).",
        "scope": "Applies to the compound microscope with integrated imaging and digital functionalities intended for laboratory use.",
        "functional_requirements_table": {
            "headers": ["FRS ID", "Function Description", "Linked URS ID", "GxP Impact"],
            "rows": [
                [
                    "FRS-001",
                    "The system shall allow switching between objective lenses to achieve magnifications from 40x to 1000x.",
                    "URS-001",
                    "Yes"
                ],
                [
                    "FRS-002",
                    "The LED light source shall provide adjustable brightness to ensure optimal illumination.",
                    "URS-002",
                    "Yes"
                ],
                [
                    "FRS-003",
                    "The microscope shall integrate with a digital camera module.",
                    "URS-003",
                    "Yes"
                ],
                [
                    "FRS-003",
                    "The microscope shall integrate with a digital camera module.",
                    "URS-003",
                    "Yes"
                ]
            ]
        },
        "non_functional_requirements": {
            "response_time": "System should load captured images within 2 seconds.",
            "storage": "Captured data must be storable on local drive or shared network.",
            "usability": "Intuitive interface for non-technical lab personnel.",
            "maintainability": "Software and device should support routine maintenance with minimal downtime."
        },
        "interface_requirements": {
            "usb": "USB 3.0 port for camera communication",
            "hdmi": "HDMI output for image projection",
            "software_compatibility": "Compatible software for Windows 10 or higher"
        },
        "approval": {
            "qa_representative": {"name": "", "role": "Quality Assurance", "signature": "", "date": ""},
            "lab_manager": {"name": "", "role": "End User", "signature": "", "date": ""},
            "validation_lead": {"name": "", "role": "Project Owner", "signature": "", "date": ""}
        },
        "content": "Welcome to the Microscope Functional Requirements Specification collaborative editor!"
    })
}
