//! Bridge configuration and object path naming.

/// Root all connection object paths hang off.
pub const OBJECT_PATH_ROOT: &str = "/im/murmur/Connection";

/// Configuration for one bridged account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Backend protocol name, e.g. `"jabber"`.
    pub protocol: String,
    /// Account name as the backend knows it.
    pub account: String,
    /// Contact name of the local user.
    pub self_id: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol: "sim".into(),
            account: "me@example.com".into(),
            self_id: "me@example.com".into(),
        }
    }
}

impl BridgeConfig {
    /// Config for `account` on `protocol`, where the local user's contact
    /// name is the account name.
    pub fn new(protocol: impl Into<String>, account: impl Into<String>) -> Self {
        let account = account.into();
        Self { protocol: protocol.into(), self_id: account.clone(), account }
    }

    /// Object path of the connection; channel paths are nested below it.
    pub fn connection_path(&self) -> String {
        format!(
            "{OBJECT_PATH_ROOT}/{}/{}",
            escape_as_identifier(&self.protocol),
            escape_as_identifier(&self.account)
        )
    }
}

/// Escape `name` into a valid object path element.
///
/// ASCII letters and digits are kept, except a leading digit; every other
/// byte becomes `_` followed by two lowercase hex digits. The empty string
/// maps to `_`.
pub fn escape_as_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_".into();
    }

    let mut escaped = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphabetic() || (i > 0 && byte.is_ascii_digit());
        if keep {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("_{byte:02x}"));
        }
    }
    escaped
}
