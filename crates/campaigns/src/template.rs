//! `{{name}}`-style placeholder substitution.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::recipient::Recipient;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

/// Render `body` for one recipient.
///
/// Known keys: `name`, `phone`. Unknown keys and missing values render empty.
pub fn render(body: &str, recipient: &Recipient) -> String {
    PLACEHOLDER
        .replace_all(body, |caps: &Captures<'_>| {
            match &caps[1] {
                "name" => recipient.name().unwrap_or_default(),
                "phone" => recipient.phone(),
                _ => "",
            }
            .to_string()
        })
        .into_owned()
}
