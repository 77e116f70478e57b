// Property-based tests for platform path conversion

use common::remote::to_remote_path;
use proptest::prelude::*;

fn platform_path() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9 _.:/\\\\-]{0,40}",
        ("[A-Z]", "[A-Za-z0-9_\\\\]{0,12}", "[A-Za-z0-9_\\\\/]{0,20}")
            .prop_map(|(drive, pre, post)| format!("{}:\\{}\\FTProot\\{}", drive, pre, post)),
        ("[A-Za-z0-9_/]{0,10}", "[0-9]{1,5}", "[A-Za-z0-9_/]{0,10}")
            .prop_map(|(pre, id, post)| format!("{}/Districts/{}/{}", pre, id, post)),
    ]
}

/// Converting an already converted path leaves it unchanged
#[test]
fn property_conversion_is_idempotent() {
    proptest!(|(input in platform_path())| {
        let once = to_remote_path(&input);
        let twice = to_remote_path(&once);
        prop_assert_eq!(once, twice, "input {:?}", input);
    });
}

/// Output is always an absolute forward-slash path without empty segments
#[test]
fn property_output_is_normalized() {
    proptest!(|(input in platform_path())| {
        let output = to_remote_path(&input);
        prop_assert!(output.starts_with('/'));
        prop_assert!(!output.contains('\\'));
        prop_assert!(!output.contains("//"));
    });
}

/// A Districts segment always survives and leads the result
#[test]
fn property_districts_marker_leads() {
    proptest!(|(
        drive in "[A-Z]",
        id in 1u32..100_000,
        tail in "[A-Za-z0-9]{1,10}"
    )| {
        let input = format!("{}:\\FTProot\\Districts\\{}\\{}", drive, id, tail);
        prop_assert_eq!(to_remote_path(&input), format!("/Districts/{}/{}", id, tail));
    });
}
