//! Structured bot templates embedded as JSON strings in turn content.
//!
//! A turn's content counts as structured only when it parses as a JSON
//! *object*; arrays, quoted strings, numbers, booleans and `null` are plain
//! text.  Three template kinds are recognised by their `template_type`.

use serde::Deserialize;
use serde_json::Value;

pub const BUTTON_TEMPLATE: &str = "fbmessenger.button_sub_template";
pub const QUICK_REPLY_TEMPLATE: &str = "fbmessenger.quick_reply";
pub const GENERIC_TEMPLATE: &str = "fbmessenger.generic";

/// A clickable entry: button or quick reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TemplateButton {
    /// Identifier echoed back as the user's input when clicked.
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ButtonPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<TemplateButton>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenericElement {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub buttons: Option<Vec<TemplateButton>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenericPayload {
    #[serde(default)]
    pub elements: Vec<GenericElement>,
}

#[derive(Deserialize)]
struct ButtonTemplate {
    #[serde(default)]
    payload: ButtonPayload,
}

#[derive(Deserialize)]
struct QuickReplyTemplate {
    #[serde(default)]
    text: String,
    #[serde(default)]
    quick_replies: Vec<TemplateButton>,
}

#[derive(Deserialize)]
struct GenericTemplate {
    #[serde(default)]
    payload: GenericPayload,
}

/// A decoded structured payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Button(ButtonPayload),
    QuickReply {
        text: String,
        quick_replies: Vec<TemplateButton>,
    },
    Generic(GenericPayload),
    /// A JSON object that is not one of the known templates.
    Unrecognized,
}

impl Template {
    /// Human-readable text shown for templates that carry one.
    pub fn display_text(&self) -> Option<&str> {
        match self {
            Template::Button(p) => Some(&p.text),
            Template::QuickReply { text, .. } => Some(text),
            Template::Generic(_) | Template::Unrecognized => None,
        }
    }
}

/// Decode `content` as a structured template.
///
/// Returns `None` when the content is not a JSON object.
pub fn decode(content: &str) -> Option<Template> {
    let value: Value = serde_json::from_str(content).ok()?;
    if !value.is_object() {
        return None;
    }

    let kind = value
        .get("template_type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let template = match kind {
        BUTTON_TEMPLATE => serde_json::from_value::<ButtonTemplate>(value)
            .map(|t| Template::Button(t.payload))
            .ok(),
        QUICK_REPLY_TEMPLATE => serde_json::from_value::<QuickReplyTemplate>(value)
            .map(|t| Template::QuickReply {
                text: t.text,
                quick_replies: t.quick_replies,
            })
            .ok(),
        GENERIC_TEMPLATE => serde_json::from_value::<GenericTemplate>(value)
            .map(|t| Template::Generic(t.payload))
            .ok(),
        _ => None,
    };

    Some(template.unwrap_or(Template::Unrecognized))
}
