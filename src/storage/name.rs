//! Stream-name codec.
//!
//! Container stream names squeeze two identifier characters into one private
//! code point so that table names survive the storage layer's 31-character
//! limit. Characters from the 64-symbol alphabet `[0-9A-Za-z._]` pack in
//! pairs into `U+3800..U+47FF`, or singly into `U+4800..U+483F`; anything
//! else passes through unchanged. Table streams carry a `U+4840` marker as
//! their first character.

/// First character of every encoded table stream name.
pub const TABLE_MARKER: char = '\u{4840}';

/// The summary information stream's literal (never encoded) name.
pub const SUMMARY_INFO_NAME: &str = "\u{5}SummaryInformation";

fn utf2mime(c: char) -> Option<u32> {
    match c {
        '0'..='9' => Some(c as u32 - '0' as u32),
        'A'..='Z' => Some(c as u32 - 'A' as u32 + 10),
        'a'..='z' => Some(c as u32 - 'a' as u32 + 10 + 26),
        '.' => Some(10 + 26 + 26),
        '_' => Some(10 + 26 + 26 + 1),
        _ => None,
    }
}

fn mime2utf(x: u32) -> char {
    match x {
        0..=9 => (b'0' + x as u8) as char,
        10..=35 => (b'A' + (x - 10) as u8) as char,
        36..=61 => (b'a' + (x - 36) as u8) as char,
        62 => '.',
        _ => '_',
    }
}

/// Encode a stream name for the container. `table` prepends the table marker.
pub fn encode(table: bool, name: &str) -> String {
    let mut out = String::with_capacity(name.len() / 2 + 1);
    if table {
        out.push(TABLE_MARKER);
    }
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match utf2mime(c) {
            Some(code) => {
                let next = chars.peek().copied().and_then(utf2mime);
                match next {
                    Some(next_code) => {
                        chars.next();
                        // Safe: 0x3800 + 63*64 + 63 = 0x47FF, below surrogates.
                        out.push(char::from_u32(0x3800 + (next_code << 6) + code).unwrap());
                    }
                    None => {
                        out.push(char::from_u32(0x4800 + code).unwrap());
                    }
                }
            }
            None => out.push(c),
        }
    }
    out
}

/// Decode a container stream name. Returns whether the name carried the
/// table marker, plus the decoded name.
pub fn decode(encoded: &str) -> (bool, String) {
    let mut out = String::with_capacity(encoded.len());
    let mut table = false;
    for (i, c) in encoded.chars().enumerate() {
        let cp = c as u32;
        if i == 0 && c == TABLE_MARKER {
            table = true;
            continue;
        }
        if (0x3800..0x4800).contains(&cp) {
            let v = cp - 0x3800;
            out.push(mime2utf(v & 0x3f));
            out.push(mime2utf(v >> 6));
        } else if (0x4800..0x4840).contains(&cp) {
            out.push(mime2utf(cp - 0x4800));
        } else {
            out.push(c);
        }
    }
    (table, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_known_table_name() {
        // "_Tables" must begin with the marker and pack pairwise.
        let enc = encode(true, "_Tables");
        assert!(enc.starts_with(TABLE_MARKER));
        let (table, name) = decode(&enc);
        assert!(table);
        assert_eq!(name, "_Tables");
    }

    #[test]
    fn test_encode_pairs_and_singles() {
        // Odd-length alphabet runs end in a single-coded char.
        let enc = encode(false, "abc");
        assert_eq!(enc.chars().count(), 2);
        let codes: Vec<u32> = enc.chars().map(|c| c as u32).collect();
        assert!((0x3800..0x4800).contains(&codes[0]));
        assert!((0x4800..0x4840).contains(&codes[1]));
        assert_eq!(decode(&enc), (false, "abc".to_string()));
    }

    #[test]
    fn test_non_alphabet_chars_pass_through() {
        let enc = encode(false, "a!b");
        assert_eq!(decode(&enc), (false, "a!b".to_string()));
        assert!(enc.contains('!'));
    }

    #[test]
    fn test_summary_stream_name_not_special() {
        // The \5SummaryInformation name is used literally; \x05 passes
        // through the codec untouched.
        let enc = encode(false, SUMMARY_INFO_NAME);
        assert_eq!(decode(&enc).1, SUMMARY_INFO_NAME);
    }

    #[test]
    fn test_decode_without_marker() {
        let enc = encode(false, "Binary.icon1");
        let (table, name) = decode(&enc);
        assert!(!table);
        assert_eq!(name, "Binary.icon1");
    }

    proptest! {
        #[test]
        fn prop_roundtrip_identifier_names(name in "[0-9A-Za-z._]{1,24}") {
            let enc = encode(true, &name);
            prop_assert_eq!(decode(&enc), (true, name.clone()));
            let enc = encode(false, &name);
            prop_assert_eq!(decode(&enc), (false, name));
        }

        #[test]
        fn prop_roundtrip_mixed_names(name in "[ -~]{0,16}") {
            // Printable ASCII, including chars outside the mime alphabet.
            let enc = encode(false, &name);
            prop_assert_eq!(decode(&enc), (false, name));
        }
    }
}
