//! TCP option scanning for the SMC capability marker

use super::SMC_EYECATCHER;

/// Experimental TCP option kind (RFC 4727) used by SMC
pub const SMC_OPTION_KIND: u8 = 254;
/// kind + length + 4-byte eyecatcher
pub const SMC_OPTION_LEN: u8 = 6;

const OPT_END: u8 = 0;
const OPT_NOP: u8 = 1;

/// Check whether a TCP option block carries the SMC marker.
///
/// Returns false for truncated or malformed option lists, even when the
/// marker precedes the damage.
pub fn has_smc_option(options: &[u8]) -> bool {
    let mut found = false;
    let mut pos = 0;

    while pos < options.len() {
        match options[pos] {
            OPT_END => break,
            OPT_NOP => pos += 1,
            kind => {
                let Some(&len) = options.get(pos + 1) else {
                    return false;
                };
                let len = len as usize;
                if len < 2 || pos + len > options.len() {
                    return false;
                }

                if kind == SMC_OPTION_KIND
                    && len == SMC_OPTION_LEN as usize
                    && options[pos + 2..pos + len] == SMC_EYECATCHER
                {
                    found = true;
                }
                pos += len;
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: [u8; 6] = [254, 6, 0xE2, 0xD4, 0xC3, 0xD9];

    #[test]
    fn test_marker_alone() {
        assert!(has_smc_option(&MARKER));
    }

    #[test]
    fn test_marker_among_syn_options() {
        // MSS, SACK permitted, timestamps, NOP, wscale, then the marker
        let mut options = vec![2, 4, 0x05, 0xb4, 4, 2, 8, 10, 0, 0, 0, 1, 0, 0, 0, 0, 1, 3, 3, 7];
        options.extend_from_slice(&MARKER);
        options.extend_from_slice(&[1, 1]);
        assert!(has_smc_option(&options));
    }

    #[test]
    fn test_no_options() {
        assert!(!has_smc_option(&[]));
        assert!(!has_smc_option(&[1, 1, 1, 0]));
    }

    #[test]
    fn test_wrong_eyecatcher() {
        assert!(!has_smc_option(&[254, 6, 0xE2, 0xD4, 0xC3, 0xD8]));
    }

    #[test]
    fn test_wrong_length() {
        // Same kind used by another experiment with a longer payload
        assert!(!has_smc_option(&[254, 8, 0xE2, 0xD4, 0xC3, 0xD9, 0, 0]));
    }

    #[test]
    fn test_wrong_kind() {
        assert!(!has_smc_option(&[253, 6, 0xE2, 0xD4, 0xC3, 0xD9]));
    }

    #[test]
    fn test_truncated_marker() {
        assert!(!has_smc_option(&MARKER[..5]));
        assert!(!has_smc_option(&[254]));
    }

    #[test]
    fn test_malformed_after_marker() {
        let mut options = MARKER.to_vec();
        options.extend_from_slice(&[8, 10, 0]);
        assert!(!has_smc_option(&options));
    }

    #[test]
    fn test_zero_length_option() {
        let mut options = vec![3, 0];
        options.extend_from_slice(&MARKER);
        assert!(!has_smc_option(&options));
    }

    #[test]
    fn test_bytes_after_end_of_list_ignored() {
        let mut options = MARKER.to_vec();
        options.extend_from_slice(&[0, 0xff, 0xff]);
        assert!(has_smc_option(&options));

        let mut hidden = vec![0, 0];
        hidden.extend_from_slice(&MARKER);
        assert!(!has_smc_option(&hidden));
    }
}
