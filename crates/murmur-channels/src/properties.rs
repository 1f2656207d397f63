//! Channel identity and interface properties.
//!
//! Interface lists are computed from channel configuration on demand rather
//! than cached, so they always reflect what the backend currently reports.

use murmur_core::{Handle, HandleType, MessageType, ObjectPath};

/// Channel type of one-to-one text channels.
pub const CHANNEL_TYPE_TEXT: &str = "im.murmur.Channel.Type.Text";
/// Channel type of contact list and roster group channels.
pub const CHANNEL_TYPE_CONTACT_LIST: &str = "im.murmur.Channel.Type.ContactList";

/// Chat state interface.
pub const IFACE_CHAT_STATE: &str = "im.murmur.Channel.Interface.ChatState";
/// Typed message interface.
pub const IFACE_MESSAGES: &str = "im.murmur.Channel.Interface.Messages";
/// Destroy-without-rescue interface.
pub const IFACE_DESTROYABLE: &str = "im.murmur.Channel.Interface.Destroyable";
/// Membership interface.
pub const IFACE_GROUP: &str = "im.murmur.Channel.Interface.Group";

/// Extra interfaces of a chat channel.
pub fn chat_interfaces(typing_supported: bool) -> Vec<&'static str> {
    if typing_supported {
        vec![IFACE_CHAT_STATE, IFACE_MESSAGES, IFACE_DESTROYABLE]
    } else {
        vec![IFACE_MESSAGES]
    }
}

/// Extra interfaces of a contact list channel.
pub fn contact_list_interfaces() -> Vec<&'static str> {
    vec![IFACE_GROUP]
}

/// Immutable-identity and state properties of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProperties {
    /// Object path.
    pub object_path: ObjectPath,
    /// Channel type.
    pub channel_type: &'static str,
    /// Handle the channel represents.
    pub target_handle: Handle,
    /// Type of `target_handle`.
    pub target_handle_type: HandleType,
    /// Name behind `target_handle`.
    pub target_id: String,
    /// Handle that caused the channel to exist.
    pub initiator_handle: Handle,
    /// Name behind `initiator_handle`.
    pub initiator_id: String,
    /// Whether the local user asked for the channel.
    pub requested: bool,
    /// Extra interfaces.
    pub interfaces: Vec<&'static str>,
    /// Whether the channel has been closed for good.
    pub destroyed: bool,
}

/// Properties of the typed message interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesProperties {
    /// Content types accepted by `send`.
    pub supported_content_types: Vec<&'static str>,
    /// Message types accepted by `send`.
    pub message_types: Vec<MessageType>,
    /// Multi-part support flags. None are supported.
    pub message_part_support_flags: u32,
    /// Delivery reporting support flags. None are supported.
    pub delivery_reporting_support: u32,
}

/// Message interface properties shared by every chat channel.
pub fn messages_properties() -> MessagesProperties {
    MessagesProperties {
        supported_content_types: vec![murmur_core::message::TEXT_PLAIN],
        message_types: vec![MessageType::Normal, MessageType::Action, MessageType::AutoReply],
        message_part_support_flags: 0,
        delivery_reporting_support: 0,
    }
}
