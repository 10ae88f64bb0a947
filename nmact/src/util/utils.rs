//! Small helpers shared across the crate.
//!
//! Remote-error cleanup, raw IPv4 decoding and the `try_log!` macro.

use std::net::Ipv4Addr;

/// Macro to convert Result to Option with error logging.
/// Usage: `try_log!(result, "context message")?`
macro_rules! try_log {
    ($result:expr, $context:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                log::warn!("{}: {:?}", $context, e);
                return None;
            }
        }
    };
}

pub(crate) use try_log;

/// Strips the transport wrapping from a remote error message.
///
/// Handles both the `GDBus.Error:<name>: <msg>` encoding and a bare
/// `<dotted.error.Name>: <msg>` prefix, leaving only the message.
pub(crate) fn strip_remote_error(msg: &str) -> &str {
    let rest = msg.strip_prefix("GDBus.Error:").unwrap_or(msg);
    match rest.split_once(": ") {
        Some((name, body)) if looks_like_error_name(name) => body,
        _ => rest,
    }
}

fn looks_like_error_name(name: &str) -> bool {
    name.contains('.')
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Decodes an IPv4 address carried as a `u32` in network byte order.
///
/// The helper publishes `in_addr_t` values, so the bytes in memory are
/// already big-endian regardless of host order.
pub(crate) fn ipv4_from_raw(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_ne_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_gdbus_wrapper() {
        assert_eq!(
            strip_remote_error(
                "GDBus.Error:org.freedesktop.NetworkManager.UnknownDevice: No device found"
            ),
            "No device found"
        );
    }

    #[test]
    fn strips_bare_error_name() {
        assert_eq!(
            strip_remote_error("org.freedesktop.DBus.Error.AccessDenied: Not authorized"),
            "Not authorized"
        );
    }

    #[test]
    fn leaves_plain_messages_alone() {
        assert_eq!(strip_remote_error("connection refused"), "connection refused");
        assert_eq!(strip_remote_error("note: see logs"), "note: see logs");
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn decodes_network_order_addresses() {
        assert_eq!(ipv4_from_raw(0x0100_007F), Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(ipv4_from_raw(0x0808_0808), Ipv4Addr::new(8, 8, 8, 8));
    }
}
