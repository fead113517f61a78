use crate::hw::RemoteIdentity;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| format!("{value:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name shown for a remote: its advertised name, else its identity.
pub(crate) fn display_name(local_name: Option<&str>, identity: &RemoteIdentity) -> String {
    local_name
        .filter(|name| !name.trim().is_empty())
        .map_or_else(|| identity.to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("80 8A 90 3C 64", format_hex(&[0x80, 0x8A, 0x90, 0x3C, 0x64]));
    }

    #[rstest]
    #[case(Some("Keys-49"), "Keys-49")]
    #[case(Some("  "), "AA:BB")]
    #[case(None, "AA:BB")]
    fn display_name_falls_back_to_identity(#[case] local_name: Option<&str>, #[case] expected: &str) {
        assert_eq!(expected, display_name(local_name, &RemoteIdentity::from("AA:BB")));
    }
}
