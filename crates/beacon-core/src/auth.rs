//! Channel authorization signatures.
//!
//! A client subscribing to a private or user-aware channel presents
//! `auth = "<app key>:<hex HMAC-SHA256>"`, where the digest is keyed by the
//! application secret over `socket_id:channel_name[:channel_data]`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::app::Application;

type HmacSha256 = Hmac<Sha256>;

/// The text a channel authorization signature covers.
#[must_use]
pub fn string_to_sign(socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{socket_id}:{channel}:{data}"),
        None => format!("{socket_id}:{channel}"),
    }
}

fn mac(secret: &str, input: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    mac
}

/// Compute the `auth` string a client must present.
#[must_use]
pub fn sign(app: &Application, socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    let input = string_to_sign(socket_id, channel, channel_data);
    let digest = mac(app.secret(), &input).finalize().into_bytes();
    format!("{}:{}", app.key(), hex::encode(digest))
}

/// Check a client-supplied `auth` string in constant time.
#[must_use]
pub fn verify(
    app: &Application,
    socket_id: &str,
    channel: &str,
    channel_data: Option<&str>,
    auth: &str,
) -> bool {
    let Some((key, signature)) = auth.split_once(':') else {
        return false;
    };
    if key != app.key() {
        return false;
    }
    let Ok(signature) = hex::decode(signature) else {
        return false;
    };

    let input = string_to_sign(socket_id, channel, channel_data);
    mac(app.secret(), &input).verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        Application::new(1, "abc", "s")
    }

    #[test]
    fn test_string_to_sign() {
        assert_eq!(string_to_sign("1.2", "private-a", None), "1.2:private-a");
        assert_eq!(
            string_to_sign("1.2", "user-aware-a", Some("{\"user_id\":\"u\"}")),
            "1.2:user-aware-a:{\"user_id\":\"u\"}"
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let app = app();
        let auth = sign(&app, "1.2", "private-orders", None);
        assert!(auth.starts_with("abc:"));
        assert_eq!(auth.len(), "abc:".len() + 64);
        assert!(verify(&app, "1.2", "private-orders", None, &auth));
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let app = app();
        let auth = sign(&app, "1.2", "private-orders", None);

        assert!(!verify(&app, "1.3", "private-orders", None, &auth));
        assert!(!verify(&app, "1.2", "private-other", None, &auth));
        assert!(!verify(&app, "1.2", "private-orders", Some("{}"), &auth));
        assert!(!verify(&app, "1.2", "private-orders", None, "garbage"));
        assert!(!verify(&app, "1.2", "private-orders", None, "abc:zz"));

        let other_key = auth.replacen("abc", "xyz", 1);
        assert!(!verify(&app, "1.2", "private-orders", None, &other_key));

        let other_secret = Application::new(1, "abc", "t");
        assert!(!verify(&other_secret, "1.2", "private-orders", None, &auth));
    }
}
