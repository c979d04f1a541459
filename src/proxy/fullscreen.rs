//! Heuristic detection of full-screen programs from the target's output.
//!
//! Only the fixed alternate-screen and cursor-visibility markers below are
//! recognised. A chunk that enters and also carries a new-screen marker (what
//! a shell prints when it redraws its own line) does not count as entering.

const ENTER_MARKERS: [&[u8]; 5] = [
    b"\x1b[?1049h",
    b"\x1b[?1048h",
    b"\x1b[?1047h",
    b"\x1b[?47h",
    b"\x1b[?25l",
];

const EXIT_MARKERS: [&[u8]; 5] = [
    b"\x1b[?1049l",
    b"\x1b[?1048l",
    b"\x1b[?1047l",
    b"\x1b[?47l",
    b"\x1b[?25h",
];

const NEW_SCREEN_MARKERS: [&[u8]; 2] = [b"\x1b[K\r\n", b"\x1b[4l"];

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn contains_any(haystack: &[u8], needles: &[&[u8]]) -> bool {
    needles.iter().any(|n| contains(haystack, n))
}

/// Full-screen state after `chunk`, given the state before it.
pub fn next_state(in_full_screen: bool, chunk: &[u8]) -> bool {
    let mut state = in_full_screen;
    if !state && contains_any(chunk, &ENTER_MARKERS) && !contains_any(chunk, &NEW_SCREEN_MARKERS) {
        state = true;
    }
    if state && contains_any(chunk, &EXIT_MARKERS) {
        state = false;
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_screen_enters_and_leaves() {
        assert!(next_state(false, b"\x1b[?1049h\x1b[22;0;0t\x1b[1;24r"));
        assert!(next_state(true, b"~\r\n~\r\n"));
        assert!(!next_state(true, b"\x1b[?1049l\x1b[23;0;0t"));
    }

    #[test]
    fn new_screen_marker_suppresses_entry() {
        assert!(!next_state(false, b"\x1b[?25l\x1b[K\r\nprogress 50%"));
        assert!(!next_state(false, b"\x1b[4l\x1b[?47h"));
    }

    #[test]
    fn enter_and_exit_in_one_chunk_nets_out() {
        assert!(!next_state(false, b"\x1b[?25lspinner\x1b[?25h"));
    }

    #[test]
    fn plain_output_keeps_state() {
        assert!(!next_state(false, b"total 0\r\n"));
        assert!(next_state(true, b"\x1b[2;1Hline"));
    }
}
