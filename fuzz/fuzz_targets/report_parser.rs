#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string (lossy conversion)
    if let Ok(input) = std::str::from_utf8(data) {
        // Attempt to parse a coverage report body
        // This should not panic regardless of input
        let _ = culpa::coverage::parse_report_text(input);
    }
});
