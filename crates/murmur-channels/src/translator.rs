//! Message translation between backend markup and typed messages.
//!
//! Inbound: backend markup is reduced to plain text and classified by the
//! backend's message flags into a typed [`Message`]. Outbound: a typed
//! message with a single `text/plain` body becomes escaped backend markup
//! plus send flags.
//!
//! Both directions are pure functions; the chat channel supplies the
//! backend's action heuristic and the clock.

use std::sync::LazyLock;

use murmur_core::{
    ChannelError, DeliveryStatus, Handle, Message, MessageFlags, MessageType,
    backend::ACTION_MARKER,
    message::{
        KEY_CONTENT, KEY_CONTENT_TYPE, KEY_DELIVERY_ERROR_MESSAGE, KEY_DELIVERY_STATUS,
        KEY_MESSAGE_RECEIVED, KEY_MESSAGE_SENT, KEY_MESSAGE_TYPE, TEXT_PLAIN,
    },
};
use regex::{Captures, Regex};

static RE_SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>"));

static RE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>(.*?)</a\s*>"#)
});

static RE_BR: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<br\s*/?\s*>"));

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)<[^>]*>"));

static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});"));

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invariant: built-in markup pattern is valid")
}

/// A message as delivered by the backend.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    /// Backend markup.
    pub markup: &'a str,
    /// Backend message flags.
    pub flags: MessageFlags,
    /// Time the message was sent, Unix seconds.
    pub sent_at: i64,
}

/// Text and flags to hand to the backend's send primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Escaped backend markup.
    pub text: String,
    /// Send flags.
    pub flags: MessageFlags,
}

/// Reduce backend markup to plain text.
///
/// Raw newlines are turned into line-break markup first so that they
/// survive stripping. Scripts and styles are dropped, links keep their
/// target when it differs from the link text, and entities are decoded.
pub fn strip_markup(markup: &str) -> String {
    let line_broken = markup.replace("\r\n", "<br>").replace('\n', "<br>").replace('\r', "");

    let text = RE_SCRIPT_STYLE.replace_all(&line_broken, "");
    let text = RE_LINK.replace_all(&text, |caps: &Captures<'_>| {
        let href = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        let label = RE_TAG.replace_all(&caps[3], "");
        let label = label.trim();
        if label.is_empty() || label == href || href.strip_prefix("mailto:") == Some(label) {
            if label.is_empty() { href.to_owned() } else { label.to_owned() }
        } else {
            format!("{label} ({href})")
        }
    });
    let text = RE_BR.replace_all(&text, "\n");
    let text = RE_TAG.replace_all(&text, "");

    RE_ENTITY
        .replace_all(&text, |caps: &Captures<'_>| {
            decode_entity(&caps[1]).map_or_else(|| caps[0].to_owned(), String::from)
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(number) = entity.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }

    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "copy" => Some('\u{a9}'),
        "reg" => Some('\u{ae}'),
        _ => None,
    }
}

/// Escape text for inclusion in backend markup.
pub fn escape_markup(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Turn a backend message into a typed message.
///
/// Returns `None` for local echoes of our own sends and for messages
/// carrying none of the error, received or sent flags. Error reports take
/// precedence over the other flags.
pub fn decode_inbound<F>(
    inbound: &Inbound<'_>,
    sender: Handle,
    received_at: i64,
    detect_action: F,
) -> Option<Message>
where
    F: FnOnce(&str) -> Option<String>,
{
    let text = strip_markup(inbound.markup);
    let flags = inbound.flags;

    if flags.contains(MessageFlags::ERROR) {
        return Some(delivery_report(sender, &text));
    }

    if flags.contains(MessageFlags::RECV) {
        let (message_type, content) = match detect_action(&text) {
            Some(action) => (MessageType::Action, action),
            None if flags.contains(MessageFlags::AUTO_RESP) => (MessageType::AutoReply, text),
            None => (MessageType::Normal, text),
        };

        let mut message = Message::text(message_type, &content);
        message.set_sender(sender);
        if flags.contains(MessageFlags::DELAYED) || inbound.sent_at != received_at {
            message.set_i64(0, KEY_MESSAGE_SENT, inbound.sent_at);
        }
        message.set_i64(0, KEY_MESSAGE_RECEIVED, received_at);
        return Some(message);
    }

    if flags.contains(MessageFlags::SEND) {
        tracing::trace!(%sender, "ignoring local echo");
        return None;
    }

    tracing::debug!(%sender, flags = flags.bits(), text = %text, "ignoring message");
    None
}

fn delivery_report(sender: Handle, text: &str) -> Message {
    let mut report = Message::text(MessageType::DeliveryReport, text);
    report.set_sender(sender);
    report.set_u32(0, KEY_DELIVERY_STATUS, DeliveryStatus::TemporarilyFailed as u32);
    report.set_str(0, KEY_DELIVERY_ERROR_MESSAGE, text);
    report
}

/// Turn a typed message into backend markup and send flags.
///
/// The message must consist of a header and exactly one `text/plain` body
/// with string content. Normal, action and auto-reply messages are
/// supported.
pub fn encode_outbound(message: &Message) -> Result<Outbound, ChannelError> {
    if message.len() != 2 {
        return Err(ChannelError::InvalidArgument(
            "messages must have a single plain-text part".into(),
        ));
    }

    if message.get_str(1, KEY_CONTENT_TYPE) != Some(TEXT_PLAIN) {
        return Err(ChannelError::InvalidArgument(
            "messages must have a single plain-text part".into(),
        ));
    }

    let Some(text) = message.get_str(1, KEY_CONTENT) else {
        return Err(ChannelError::InvalidArgument("message body must be a UTF-8 string".into()));
    };

    let code = message.get_u32(0, KEY_MESSAGE_TYPE).unwrap_or(MessageType::Normal as u32);
    let (text, flags) = match MessageType::from_code(code) {
        Some(MessageType::Action) => (format!("{ACTION_MARKER}{text}"), MessageFlags::NONE),
        Some(MessageType::AutoReply) => (text.to_owned(), MessageFlags::AUTO_RESP),
        Some(MessageType::Normal) => (text.to_owned(), MessageFlags::NONE),
        _ => {
            return Err(ChannelError::NotImplemented(format!("unsupported message type: {code}")));
        },
    };

    // Some backends send &apos; literally
    let text = escape_markup(&text).replace('\n', "<br>").replace("&apos;", "'");
    Ok(Outbound { text, flags })
}
