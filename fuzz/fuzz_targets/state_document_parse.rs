#![no_main]

use idlewatch_runtime::{parse_state_document, render_state_document};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok((snapshot, _source)) = parse_state_document(&raw) {
        let rendered = render_state_document(&snapshot).expect("snapshot renders");
        let (reparsed, _) = parse_state_document(&rendered).expect("rendered state reparses");
        assert_eq!(reparsed.groups, snapshot.groups);
        assert_eq!(reparsed.global_last_run_date, snapshot.global_last_run_date);
    }
});
