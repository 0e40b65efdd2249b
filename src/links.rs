//! CoRE link-format helpers (RFC 6690)
//!
//! Registration payloads and discover responses are comma separated lists of
//! `<uri>` tokens, optionally followed by `;param=value` attributes.

/// Join URIs into a link-format body: `</3/0>,</4/0>`
pub fn format_links<S: AsRef<str>>(uris: &[S]) -> String {
    uris.iter()
        .map(|uri| format!("<{}>", uri.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Extract the URIs of a link-format body, dropping link parameters
pub fn parse_links(body: &str) -> Vec<String> {
    body.split(',')
        .filter_map(|link| {
            let target = link.trim().split(';').next()?.trim();
            let uri = target.strip_prefix('<')?.strip_suffix('>')?;
            Some(uri.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_links() {
        assert_eq!(format_links(&["/3/0", "/4/0"]), "</3/0>,</4/0>");
        assert_eq!(format_links::<&str>(&[]), "");
    }

    #[test]
    fn test_parse_links_ignores_parameters() {
        let links = parse_links("</>;rt=\"oma.lwm2m\", </3/0>;pmin=10,</4/0>,garbage");
        assert_eq!(links, vec!["/", "/3/0", "/4/0"]);
    }
}
