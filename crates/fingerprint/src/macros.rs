//! Temporal macro detection (`__DATE__`, `__TIME__`, `__TIMESTAMP__`)
//! using a Boyer-Moore-Horspool search, as called for by the spec's
//! note that this scan should avoid a naive byte-by-byte comparison on
//! large translation units. No AVX2 fast path is implemented here: the
//! example pack carries no SIMD string-search crate, so this is the
//! portable fallback path the spec describes as always available.

use crate::inode_cache::MacroFlags;

const DATE_TOKEN: &[u8] = b"__DATE__";
const TIME_TOKEN: &[u8] = b"__TIME__";
const TIMESTAMP_TOKEN: &[u8] = b"__TIMESTAMP__";

fn contains_bmh(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    let mut shift = [needle.len(); 256];
    for (i, &b) in needle.iter().enumerate().take(needle.len() - 1) {
        shift[b as usize] = needle.len() - 1 - i;
    }

    let mut pos = 0;
    while pos <= haystack.len() - needle.len() {
        let window = &haystack[pos..pos + needle.len()];
        if window == needle {
            return true;
        }
        let last = haystack[pos + needle.len() - 1];
        pos += shift[last as usize];
    }
    false
}

pub fn scan_temporal_macros(bytes: &[u8]) -> MacroFlags {
    MacroFlags {
        has_date: contains_bmh(bytes, DATE_TOKEN),
        has_time: contains_bmh(bytes, TIME_TOKEN),
        has_timestamp: contains_bmh(bytes, TIMESTAMP_TOKEN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_date_token() {
        let flags = scan_temporal_macros(b"const char *d = __DATE__;");
        assert!(flags.has_date);
        assert!(!flags.has_time);
    }

    #[test]
    fn finds_time_token_distinct_from_timestamp() {
        let flags = scan_temporal_macros(b"puts(__TIME__);");
        assert!(flags.has_time);
        assert!(!flags.has_timestamp);
    }

    #[test]
    fn finds_timestamp_token() {
        let flags = scan_temporal_macros(b"puts(__TIMESTAMP__);");
        assert!(flags.has_timestamp);
    }

    #[test]
    fn no_tokens_present() {
        let flags = scan_temporal_macros(b"int main(void) { return 0; }");
        assert!(!flags.has_date && !flags.has_time && !flags.has_timestamp);
    }
}
