//! Data packets and the packet algebra that drives explode/merge/drop.
//!
//! Generalizes the teacher's single `Payload` content-parts model
//! (`payload.rs`) to a list that a plugin or step can emit zero, one, or
//! many of for a single input row.

use serde_json::Value;

/// One piece of content inside a [`DataPacket`]: either rendered text or
/// an inline image, mirroring how an LLM chat message can carry text and
/// image parts together.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    Image { bytes: Vec<u8>, mime_type: String },
}

impl ContentPart {
    pub fn text(s: impl Into<String>) -> Self {
        ContentPart::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(t) => Some(t),
            ContentPart::Image { .. } => None,
        }
    }
}

/// The unit exchanged between plugins and the step executor.
///
/// `data` is the structured result (merged into the row on `merge`
/// output mode, serialized on `column` mode). `content_parts` carries
/// any text/image content the next stage (an LLM call, typically)
/// should see in addition to the row's own fields.
#[derive(Debug, Clone, Default)]
pub struct DataPacket {
    pub data: Value,
    pub content_parts: Vec<ContentPart>,
}

impl DataPacket {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            content_parts: Vec::new(),
        }
    }

    pub fn with_content(mut self, parts: Vec<ContentPart>) -> Self {
        self.content_parts = parts;
        self
    }

    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            data: Value::String(text.clone()),
            content_parts: vec![ContentPart::Text(text)],
        }
    }
}

/// The outcome of running a row through one preprocessing plugin:
/// zero packets (drop), one packet (merge and continue), or many
/// (explode into sibling rows).
///
/// This is the packet algebra from SPEC_FULL.md §3: the number of
/// packets returned, not their content, decides what happens to the row.
#[derive(Debug, Clone, Default)]
pub struct PluginOutcome {
    pub packets: Vec<DataPacket>,
}

impl PluginOutcome {
    pub fn drop() -> Self {
        Self { packets: Vec::new() }
    }

    pub fn one(packet: DataPacket) -> Self {
        Self {
            packets: vec![packet],
        }
    }

    pub fn explode(packets: Vec<DataPacket>) -> Self {
        Self { packets }
    }

    /// What this outcome means for row population size: the row is
    /// dropped, continues unchanged in place, or explodes into N rows.
    pub fn disposition(&self) -> Disposition {
        match self.packets.len() {
            0 => Disposition::Drop,
            1 => Disposition::Continue,
            n => Disposition::Explode(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Drop,
    Continue,
    Explode(usize),
}
