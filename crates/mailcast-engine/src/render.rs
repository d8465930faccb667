//! Template rendering: placeholder substitution, embedded-resource
//! references, and the per-recipient tracking marker.

use std::sync::OnceLock;

use mailcast_core::types::{Recipient, VariableBinding};
use regex::Regex;

fn cid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"src=["']cid:([^"']+)["']"#).expect("cid regex"))
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\{\{name\}\}").expect("name regex"))
}

/// Collect the distinct `cid:` identifiers referenced by the template,
/// in first-appearance order.
pub fn extract_cid_refs(html: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in cid_regex().captures_iter(html) {
        let cid = cap[1].to_string();
        if !seen.contains(&cid) {
            seen.push(cid);
        }
    }
    seen
}

/// Substitute bound `{{placeholder}}` tokens with the recipient's field
/// values, then the reserved `{{name}}` token (case-insensitive) with the
/// display name. Bindings the recipient has no value for are left as-is.
pub fn personalize(
    template: &str,
    bindings: &[VariableBinding],
    recipient: &Recipient,
    display_name: &str,
) -> String {
    let mut out = template.to_string();
    for binding in bindings {
        if let Some(value) = recipient.field(&binding.column) {
            let token = format!("{{{{{}}}}}", binding.placeholder);
            out = out.replace(&token, value);
        }
    }
    name_regex().replace_all(&out, display_name).into_owned()
}

/// Append the open-tracking pixel bound to (campaign, recipient email).
/// Inserted before `</body>` when present, appended otherwise.
pub fn append_tracking_pixel(html: &str, base_url: &str, campaign_id: &str, email: &str) -> String {
    let pixel = format!(
        r#"<img src="{}/api/track/open/{}?email={}" width="1" height="1" style="display:none;" />"#,
        base_url.trim_end_matches('/'),
        campaign_id,
        urlencoding::encode(email),
    );
    if let Some(idx) = html.find("</body>") {
        let mut out = String::with_capacity(html.len() + pixel.len());
        out.push_str(&html[..idx]);
        out.push_str(&pixel);
        out.push_str(&html[idx..]);
        out
    } else {
        format!("{html}{pixel}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn recipient(pairs: &[(&str, &str)]) -> Recipient {
        Recipient::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_extract_cid_refs_dedups() {
        let html = r#"<img src="cid:logo"><img src='cid:banner'><img src="cid:logo">"#;
        assert_eq!(extract_cid_refs(html), vec!["logo", "banner"]);
    }

    #[test]
    fn test_extract_no_refs() {
        assert!(extract_cid_refs("<p>plain</p>").is_empty());
    }

    #[test]
    fn test_personalize_bindings_and_name() {
        let bindings = vec![VariableBinding {
            placeholder: "city".into(),
            column: "City".into(),
        }];
        let r = recipient(&[("City", "Hanoi"), ("name", "Alice")]);
        let out = personalize("Hi {{Name}}, weather in {{city}}?", &bindings, &r, "Alice");
        assert_eq!(out, "Hi Alice, weather in Hanoi?");
    }

    #[test]
    fn test_personalize_missing_field_leaves_token() {
        let bindings = vec![VariableBinding {
            placeholder: "city".into(),
            column: "city".into(),
        }];
        let out = personalize("{{city}}", &bindings, &recipient(&[]), "");
        assert_eq!(out, "{{city}}");
    }

    #[test]
    fn test_personalize_empty_display_name() {
        let out = personalize("Hello {{name}}!", &[], &recipient(&[]), "");
        assert_eq!(out, "Hello !");
    }

    #[test]
    fn test_tracking_pixel_before_body_close() {
        let out = append_tracking_pixel(
            "<html><body>hi</body></html>",
            "https://track.example.com/",
            "c1",
            "a+b@example.com",
        );
        assert!(out.contains("https://track.example.com/api/track/open/c1?email=a%2Bb%40example.com"));
        let pixel_idx = out.find("<img").unwrap();
        assert!(pixel_idx < out.find("</body>").unwrap());
    }

    #[test]
    fn test_tracking_pixel_appended_without_body() {
        let out = append_tracking_pixel("<p>hi</p>", "http://t", "c1", "a@b.com");
        assert!(out.starts_with("<p>hi</p><img"));
    }
}
