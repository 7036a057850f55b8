use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static SEMANTIC_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(\w+)>\s+(label|title):'(.*)'$").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid action descriptor '{0}'")]
pub struct ActionParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefAttribute {
    Label,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementRef {
    Id(String),
    Semantic {
        role: String,
        attribute: RefAttribute,
        text: String,
    },
}

impl ElementRef {
    fn parse(raw: &str) -> Result<Self, ActionParseError> {
        let raw = unquote(raw.trim());
        if raw.is_empty() {
            return Err(ActionParseError(raw));
        }
        if let Some(caps) = SEMANTIC_REF_RE.captures(&raw) {
            let attribute = if &caps[2] == "label" {
                RefAttribute::Label
            } else {
                RefAttribute::Title
            };
            return Ok(ElementRef::Semantic {
                role: caps[1].to_string(),
                attribute,
                text: caps[3].to_string(),
            });
        }
        Ok(ElementRef::Id(raw))
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRef::Id(id) => write!(f, "{id}"),
            ElementRef::Semantic {
                role,
                attribute,
                text,
            } => {
                let attr = match attribute {
                    RefAttribute::Label => "label",
                    RefAttribute::Title => "title",
                };
                write!(f, "<{role}> {attr}:'{text}'")
            }
        }
    }
}

/// One executor instruction, e.g. `click(<AXButton> label:'Submit')` or `type(text_1, "hi")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDescriptor {
    Click(ElementRef),
    DoubleClick(ElementRef),
    RightClick(ElementRef),
    Type { target: ElementRef, text: String },
    KeyPress(String),
    Scroll(String),
    Focus(ElementRef),
    Wait(String),
    Navigate(String),
}

impl ActionDescriptor {
    pub fn action_type(&self) -> &'static str {
        match self {
            ActionDescriptor::Click(_) => "click",
            ActionDescriptor::DoubleClick(_) => "double_click",
            ActionDescriptor::RightClick(_) => "right_click",
            ActionDescriptor::Type { .. } => "type",
            ActionDescriptor::KeyPress(_) => "key_press",
            ActionDescriptor::Scroll(_) => "scroll",
            ActionDescriptor::Focus(_) => "focus",
            ActionDescriptor::Wait(_) => "wait",
            ActionDescriptor::Navigate(_) => "navigate",
        }
    }

    /// Actions whose effect needs no visual confirmation.
    pub fn is_simple(&self) -> bool {
        matches!(self, ActionDescriptor::Wait(_))
    }
}

impl FromStr for ActionDescriptor {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ActionParseError(s.to_string());
        let open = s.find('(').ok_or_else(err)?;
        if !s.ends_with(')') {
            return Err(err());
        }
        let name = s[..open].trim();
        let inner = s[open + 1..s.len() - 1].trim();

        let descriptor = match name {
            "click" => ActionDescriptor::Click(ElementRef::parse(inner)?),
            "double_click" => ActionDescriptor::DoubleClick(ElementRef::parse(inner)?),
            "right_click" => ActionDescriptor::RightClick(ElementRef::parse(inner)?),
            "focus" => ActionDescriptor::Focus(ElementRef::parse(inner)?),
            "type" => {
                let (target, text) = split_top_level_comma(inner).ok_or_else(err)?;
                ActionDescriptor::Type {
                    target: ElementRef::parse(target)?,
                    text: unquote(text.trim()),
                }
            }
            "key_press" => ActionDescriptor::KeyPress(required_arg(inner).ok_or_else(err)?),
            "scroll" => ActionDescriptor::Scroll(required_arg(inner).ok_or_else(err)?),
            "wait" => ActionDescriptor::Wait(required_arg(inner).ok_or_else(err)?),
            "navigate" => ActionDescriptor::Navigate(required_arg(inner).ok_or_else(err)?),
            _ => return Err(err()),
        };
        Ok(descriptor)
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionDescriptor::Click(t)
            | ActionDescriptor::DoubleClick(t)
            | ActionDescriptor::RightClick(t)
            | ActionDescriptor::Focus(t) => write!(f, "{}({t})", self.action_type()),
            ActionDescriptor::Type { target, text } => {
                write!(f, "type({target}, \"{}\")", escape(text))
            }
            ActionDescriptor::KeyPress(arg)
            | ActionDescriptor::Scroll(arg)
            | ActionDescriptor::Wait(arg)
            | ActionDescriptor::Navigate(arg) => {
                write!(f, "{}(\"{}\")", self.action_type(), escape(arg))
            }
        }
    }
}

fn required_arg(inner: &str) -> Option<String> {
    let arg = unquote(inner);
    (!arg.is_empty()).then_some(arg)
}

/// Splits at the first comma outside single or double quotes.
fn split_top_level_comma(text: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    let mut escape_next = false;
    for (idx, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match (ch, quote) {
            ('\\', _) => escape_next = true,
            ('"' | '\'', None) => quote = Some(ch),
            (c, Some(q)) if c == q => quote = None,
            (',', None) => return Some((&text[..idx], &text[idx + 1..])),
            _ => {}
        }
    }
    None
}

fn unquote(text: &str) -> String {
    let stripped = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .filter(|_| text.len() >= 2);
    match stripped {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => text.to_string(),
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
