#![no_main]

use idlewatch_policy::{parse_alias_table, split_alias_entry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Some((id, alias)) = split_alias_entry(&raw) {
        assert!(!id.is_empty());
        assert!(!alias.is_empty());
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
        let mut diagnostics = Vec::new();
        let table = parse_alias_table("nickname_mapping", &value, &mut diagnostics);
        assert!(table
            .iter()
            .all(|(id, alias)| !id.trim().is_empty() && !alias.trim().is_empty()));
    }
});
